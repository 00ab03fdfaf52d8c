//! Connection router
//!
//! The [`Linker`] maps connection requests onto a host-keyed cache of open
//! [`Link`]s. A request is one of:
//!
//! - nothing (`None` or `""`): the master, or the single connection when
//!   sharding is off
//! - a role token: `"master"` or `"slave"` (a random configured replica)
//! - a literal host, matched against the configured master and replica hosts
//!
//! Links are opened lazily and reused for as long as they stay connected.

use super::config::{Credentials, DatabaseConfig};
use super::driver::{DefaultDriverFactory, DriverFactory};
use super::error::{DatabaseError, Result};
use super::link::{Link, Role};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request<'a> {
    Default,
    Role(Role),
    Host(&'a str),
}

impl<'a> Request<'a> {
    fn parse(requested: Option<&'a str>) -> Self {
        match requested.map(str::trim) {
            None | Some("") => Request::Default,
            Some(token) => match Role::from_token(token) {
                Some(role) => Request::Role(role),
                None => Request::Host(token),
            },
        }
    }
}

/// Host-keyed cache of Links
pub struct Linker {
    config: DatabaseConfig,
    factory: Arc<dyn DriverFactory>,
    links: RwLock<HashMap<String, Arc<Link>>>,
}

impl std::fmt::Debug for Linker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linker")
            .field("config", &self.config)
            .field("hosts", &self.hosts())
            .finish_non_exhaustive()
    }
}

impl Linker {
    /// Router using the backends compiled into the crate
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_factory(config, DefaultDriverFactory)
    }

    /// Router creating drivers through `factory`
    pub fn with_factory(config: DatabaseConfig, factory: impl DriverFactory + 'static) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Number of cached Links
    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }

    /// Cached hosts, sorted
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.links.read().keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Role a role token stands for under the current sharding setting
    fn effective_role(&self, request: Request<'_>) -> Role {
        match (self.config.sharding, request) {
            (false, _) => Role::Single,
            (true, Request::Role(Role::Slave)) => Role::Slave,
            (true, _) => Role::Master,
        }
    }

    /// Role and merged credentials for a connect request
    fn resolve_target(&self, request: Request<'_>) -> Result<(Role, Credentials)> {
        if !self.config.sharding {
            let base = &self.config.database;
            return match request {
                Request::Host(host) if base.host.as_deref() != Some(host) => Err(
                    DatabaseError::config(format!("unknown host '{}' (sharding is disabled)", host)),
                ),
                _ => Ok((Role::Single, base.merged_over(&Credentials::default()))),
            };
        }

        let master = self.config.master_credentials();
        let slaves = self.config.slave_credentials();
        match request {
            Request::Default | Request::Role(Role::Master) | Request::Role(Role::Single) => {
                Ok((Role::Master, master))
            }
            Request::Role(Role::Slave) => {
                let picked = slaves.choose(&mut rand::thread_rng()).cloned();
                picked
                    .map(|slave| (Role::Slave, slave))
                    .ok_or_else(|| DatabaseError::config("no slaves are configured"))
            }
            Request::Host(host) => {
                if master.host.as_deref() == Some(host) {
                    return Ok((Role::Master, master));
                }
                slaves
                    .into_iter()
                    .find(|slave| slave.host.as_deref() == Some(host))
                    .map(|slave| (Role::Slave, slave))
                    .ok_or_else(|| {
                        DatabaseError::config(format!(
                            "host '{}' is neither the master nor a configured slave",
                            host
                        ))
                    })
            }
        }
    }

    fn cached(&self, host: &str) -> Option<Arc<Link>> {
        self.links
            .read()
            .get(host)
            .filter(|link| link.is_connected())
            .cloned()
    }

    /// Resolve `requested` to an open Link, connecting if needed
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::Config`] when the request matches no configured
    ///   host or the merged credentials are incomplete
    /// - [`DatabaseError::Connection`] when the backend cannot be reached
    pub async fn connect(&self, requested: Option<&str>) -> Result<Arc<Link>> {
        let request = Request::parse(requested);
        if let Request::Host(host) = request {
            if let Some(link) = self.cached(host) {
                return Ok(link);
            }
        }

        let (role, credentials) = self.resolve_target(request)?;
        let credentials = credentials.resolve()?;
        if let Some(link) = self.cached(&credentials.host) {
            return Ok(link);
        }

        let host = credentials.host.clone();
        let driver = self.factory.create(self.config.agent)?;
        let link = Arc::new(Link::new(role, credentials, driver, &self.config));
        link.open().await?;

        // Another connect may have cached this host while we were opening
        let winner = {
            let mut links = self.links.write();
            match links.get(&host) {
                Some(existing) if existing.is_connected() => Arc::clone(existing),
                _ => {
                    links.insert(host.clone(), Arc::clone(&link));
                    Arc::clone(&link)
                }
            }
        };
        if !Arc::ptr_eq(&winner, &link) {
            if let Err(e) = link.close().await {
                tracing::debug!(host = %host, error = %e, "closing duplicate link failed");
            }
        }
        Ok(winner)
    }

    /// Close and evict Links
    ///
    /// `None`, `""` or `"*"` closes everything, a role token closes every
    /// Link of that role, anything else closes the Link cached for that host.
    /// Returns the number of Links closed.
    ///
    /// # Errors
    ///
    /// Every selected Link is evicted and closed; the first close failure is
    /// returned afterwards.
    pub async fn disconnect(&self, requested: Option<&str>) -> Result<usize> {
        let request = match requested.map(str::trim) {
            Some("*") => Request::Default,
            other => Request::parse(other),
        };

        let evicted: Vec<Arc<Link>> = {
            let mut links = self.links.write();
            let hosts: Vec<String> = links
                .iter()
                .filter(|(host, link)| match request {
                    Request::Default => true,
                    Request::Role(_) => link.role() == self.effective_role(request),
                    Request::Host(wanted) => host.as_str() == wanted,
                })
                .map(|(host, _)| host.clone())
                .collect();
            hosts.iter().filter_map(|host| links.remove(host)).collect()
        };

        let mut first_error = None;
        for link in &evicted {
            if let Err(e) = link.close().await {
                tracing::warn!(host = %link.host(), error = %e, "disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(evicted.len()),
        }
    }

    /// Whether [`get_connection`](Self::get_connection) would succeed
    pub fn is_connected(&self, requested: Option<&str>) -> bool {
        self.get_connection(requested).is_ok()
    }

    /// Look up an open Link without connecting
    ///
    /// A host returns the Link cached for it. A role, or nothing, returns a
    /// random open Link of that role.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::NotFound`] when no open Link matches.
    pub fn get_connection(&self, requested: Option<&str>) -> Result<Arc<Link>> {
        let request = Request::parse(requested);
        if let Request::Host(host) = request {
            return self
                .cached(host)
                .ok_or_else(|| DatabaseError::not_found(format!("host '{}'", host)));
        }

        let role = self.effective_role(request);
        let candidates: Vec<Arc<Link>> = self
            .links
            .read()
            .values()
            .filter(|link| link.role() == role && link.is_connected())
            .cloned()
            .collect();
        let picked = candidates.choose(&mut rand::thread_rng()).cloned();
        picked.ok_or_else(|| DatabaseError::not_found(format!("role '{}'", role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::Agent;
    use crate::core::config::ResolvedCredentials;
    use crate::core::driver::Driver;
    use crate::core::result::RawResultSet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Driver that only records connections
    struct MockDriver {
        connected: AtomicBool,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Driver for MockDriver {
        fn agent(&self) -> Agent {
            Agent::Mysql
        }

        async fn connect(&self, credentials: &ResolvedCredentials) -> Result<()> {
            if credentials.host == "unreachable" {
                return Err(DatabaseError::connection(&credentials.host, "refused"));
            }
            tokio::task::yield_now().await;
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _sql: &str) -> Result<RawResultSet> {
            Ok(RawResultSet::default())
        }

        async fn begin_transaction(&self) -> Result<()> {
            Ok(())
        }

        async fn commit(&self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            false
        }
    }

    fn linker(config: DatabaseConfig) -> (Linker, Arc<AtomicUsize>) {
        let (linker, opened, _) = counting_linker(config);
        (linker, opened)
    }

    fn counting_linker(config: DatabaseConfig) -> (Linker, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let (open_count, close_count) = (Arc::clone(&opened), Arc::clone(&closed));
        let linker = Linker::with_factory(config, move |_agent: Agent| -> Result<Box<dyn Driver>> {
            Ok(Box::new(MockDriver {
                connected: AtomicBool::new(false),
                opened: Arc::clone(&open_count),
                closed: Arc::clone(&close_count),
            }))
        });
        (linker, opened, closed)
    }

    fn base() -> Credentials {
        Credentials {
            host: Some("db".to_string()),
            name: Some("app".to_string()),
            username: Some("app".to_string()),
            password: Some("secret".to_string()),
            ..Credentials::default()
        }
    }

    fn sharded() -> DatabaseConfig {
        DatabaseConfig::new(Agent::Mysql, base()).with_sharding(
            Credentials::for_host("primary"),
            vec![
                Credentials::for_host("replica-1"),
                Credentials::for_host("replica-2"),
            ],
        )
    }

    #[tokio::test]
    async fn test_single_role_without_sharding() {
        let (linker, opened) = linker(DatabaseConfig::new(Agent::Mysql, base()));

        let link = linker.connect(None).await.unwrap();
        assert_eq!(link.role(), Role::Single);
        assert_eq!(link.host(), "db");

        for request in [Some("master"), Some("slave"), Some("db"), Some("")] {
            let again = linker.connect(request).await.unwrap();
            assert!(Arc::ptr_eq(&link, &again));
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        let err = linker.connect(Some("elsewhere")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[tokio::test]
    async fn test_sharded_roles() {
        let (linker, opened) = linker(sharded());

        let master = linker.connect(None).await.unwrap();
        assert_eq!(master.role(), Role::Master);
        assert_eq!(master.host(), "primary");
        assert_eq!(master.credentials().name, "app");

        for _ in 0..10 {
            let slave = linker.connect(Some("slave")).await.unwrap();
            assert_eq!(slave.role(), Role::Slave);
            assert!(slave.host().starts_with("replica-"));
        }
        for _ in 0..10 {
            assert_eq!(
                linker.get_connection(Some("slave")).unwrap().role(),
                Role::Slave
            );
        }

        // one master plus at most the two distinct replicas
        assert!(opened.load(Ordering::SeqCst) <= 3);
        assert_eq!(linker.len(), opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_racing_connects_keep_first_link() {
        let (linker, opened, closed) = counting_linker(sharded());

        let (first, second) = tokio::join!(
            linker.connect(Some("primary")),
            linker.connect(Some("primary"))
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_connected());
        assert_eq!(linker.len(), 1);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_literal_host_infers_role() {
        let (linker, _) = linker(sharded());

        let link = linker.connect(Some("replica-2")).await.unwrap();
        assert_eq!(link.role(), Role::Slave);
        let link = linker.connect(Some("primary")).await.unwrap();
        assert_eq!(link.role(), Role::Master);

        let err = linker.connect(Some("db")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[tokio::test]
    async fn test_incomplete_credentials() {
        let mut credentials = base();
        credentials.username = None;
        let (linker, _) = linker(DatabaseConfig::new(Agent::Mysql, credentials));

        let err = linker.connect(None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_cached() {
        let mut credentials = base();
        credentials.host = Some("unreachable".to_string());
        let (linker, _) = linker(DatabaseConfig::new(Agent::Mysql, credentials));

        let err = linker.connect(None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connection { .. }));
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn test_get_connection_is_read_only() {
        let (linker, opened) = linker(sharded());

        assert!(!linker.is_connected(None));
        let err = linker.get_connection(Some("slave")).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
        assert_eq!(opened.load(Ordering::SeqCst), 0);

        linker.connect(Some("master")).await.unwrap();
        assert!(linker.is_connected(None));
        assert!(linker.is_connected(Some("primary")));
        assert!(!linker.is_connected(Some("slave")));
    }

    #[tokio::test]
    async fn test_disconnect_by_host_role_and_all() {
        let (linker, _) = linker(sharded());
        linker.connect(None).await.unwrap();
        linker.connect(Some("replica-1")).await.unwrap();
        linker.connect(Some("replica-2")).await.unwrap();
        assert_eq!(linker.hosts(), vec!["primary", "replica-1", "replica-2"]);

        assert_eq!(linker.disconnect(Some("replica-1")).await.unwrap(), 1);
        assert_eq!(linker.hosts(), vec!["primary", "replica-2"]);

        assert_eq!(linker.disconnect(Some("slave")).await.unwrap(), 1);
        assert_eq!(linker.hosts(), vec!["primary"]);

        linker.connect(Some("replica-1")).await.unwrap();
        assert_eq!(linker.disconnect(Some("*")).await.unwrap(), 2);
        assert!(linker.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (linker, opened) = linker(sharded());
        let first = linker.connect(None).await.unwrap();
        linker.disconnect(None).await.unwrap();
        assert!(!first.is_connected());

        let second = linker.connect(None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }
}
