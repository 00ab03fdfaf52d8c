//! Transactional statement batches
//!
//! A [`Batch`] queues resolved statements against one [`Link`] and runs them
//! in order inside a single transaction. Any failure rolls the whole batch
//! back.
//!
//! ```ignore
//! let mut batch = link.batch();
//! batch
//!     .queue("INSERT INTO users (name) VALUES (?)", params!["alice"])?
//!     .queue("INSERT INTO users (name) VALUES (?)", params!["bob"])?;
//! batch.run().await?;
//! let ids = batch.merged_result_ids();
//! ```

use super::error::{DatabaseError, Result};
use super::link::Link;
use super::params::Params;
use super::result::QueryResult;
use std::time::{Duration, Instant};

/// Statement queue bound to one Link
#[derive(Debug)]
pub struct Batch<'a> {
    link: &'a Link,
    queue: Vec<String>,
    results: Vec<QueryResult>,
    elapsed: Duration,
}

impl<'a> Batch<'a> {
    pub fn new(link: &'a Link) -> Self {
        Self {
            link,
            queue: Vec::new(),
            results: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Resolve a statement template and append it to the queue
    ///
    /// # Errors
    ///
    /// Preparer errors are raised here, not when the batch runs.
    pub fn queue(&mut self, template: &str, params: impl Into<Params>) -> Result<&mut Self> {
        let sql = self.link.prepare(template, &params.into())?;
        self.queue.push(sql);
        Ok(self)
    }

    /// Resolved statements waiting to run
    pub fn statements(&self) -> &[String] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run every queued statement in one transaction
    ///
    /// The queue is emptied whatever the outcome. Results of statements that
    /// affected no rows are not kept. An empty queue touches no transaction
    /// and clears the results and timing of any earlier run.
    ///
    /// # Errors
    ///
    /// The first failing statement rolls the transaction back and its error
    /// is returned. The configured error handler is not consulted.
    pub async fn run(&mut self) -> Result<&[QueryResult]> {
        let statements = std::mem::take(&mut self.queue);
        self.results.clear();
        self.elapsed = Duration::ZERO;
        if statements.is_empty() {
            return Ok(&self.results);
        }
        if self.link.in_transaction() {
            return Err(DatabaseError::transaction(
                "cannot run a batch while the Link has an open transaction",
            ));
        }

        let started = Instant::now();

        self.link.begin().await?;
        for sql in &statements {
            match self.link.execute_unhandled(sql).await {
                Ok(result) if result.rows_affected > 0 => self.results.push(result),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        host = %self.link.host(),
                        error = %error,
                        statements = statements.len(),
                        "batch statement failed, rolling back"
                    );
                    self.abort().await;
                    return Err(error);
                }
            }
        }

        if let Err(error) = self.link.commit().await {
            self.abort().await;
            return Err(error);
        }

        self.elapsed = started.elapsed();
        tracing::debug!(
            host = %self.link.host(),
            statements = statements.len(),
            kept = self.results.len(),
            elapsed = ?self.elapsed,
            "batch committed"
        );
        Ok(&self.results)
    }

    async fn abort(&mut self) {
        self.results.clear();
        if self.link.in_transaction() {
            if let Err(e) = self.link.rollback().await {
                tracing::error!(host = %self.link.host(), error = %e, "batch rollback failed");
            }
        }
    }

    /// Alias of [`run`](Self::run)
    pub async fn commit(&mut self) -> Result<&[QueryResult]> {
        self.run().await
    }

    /// Drop the queue and any results; nothing queued has reached the backend
    pub fn cancel(&mut self) {
        self.queue.clear();
        self.results.clear();
        self.elapsed = Duration::ZERO;
    }

    /// Alias of [`cancel`](Self::cancel)
    pub fn rollback(&mut self) {
        self.cancel();
    }

    /// Results of the last run, one per statement that affected rows
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }

    /// Inserted identifiers of the last run, per kept statement
    pub fn result_ids(&self) -> Vec<Vec<u64>> {
        self.results.iter().map(|r| r.insert_ids.clone()).collect()
    }

    /// Inserted identifiers of the last run, flattened in statement order
    pub fn merged_result_ids(&self) -> Vec<u64> {
        self.results
            .iter()
            .flat_map(|r| r.insert_ids.iter().copied())
            .collect()
    }

    /// Wall time of the last successful run
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::SqliteDriver;
    use crate::core::agent::Agent;
    use crate::core::config::{Credentials, DatabaseConfig};
    use crate::core::link::Role;
    use crate::params;

    async fn link() -> Link {
        let config = DatabaseConfig::new(
            Agent::Sqlite,
            Credentials {
                host: Some("local".to_string()),
                name: Some(":memory:".to_string()),
                username: Some("app".to_string()),
                password: Some(String::new()),
                ..Credentials::default()
            },
        );
        let credentials = config.database.resolve().unwrap();
        let link = Link::new(Role::Single, credentials, Box::new(SqliteDriver::new()), &config);
        link.open().await.unwrap();
        link.execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
            .await
            .unwrap();
        link
    }

    async fn count(link: &Link) -> i64 {
        let result = link.query("SELECT COUNT(*) AS n FROM items", params![]).await.unwrap();
        result.first().and_then(|r| r.get("n")).and_then(|v| v.as_long()).unwrap()
    }

    #[tokio::test]
    async fn test_run_keeps_affecting_results() {
        let link = link().await;
        let mut batch = link.batch();
        batch
            .queue("INSERT INTO items (name) VALUES (?)", params!["a"])
            .unwrap()
            .queue("INSERT INTO items (name) VALUES (?), (?)", params!["b", "c"])
            .unwrap()
            .queue("UPDATE items SET name = 'z' WHERE id = ?", params![99])
            .unwrap();
        assert_eq!(batch.len(), 3);

        let results = batch.run().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(batch.is_empty());
        assert_eq!(batch.result_ids(), vec![vec![1], vec![2, 3]]);
        assert_eq!(batch.merged_result_ids(), vec![1, 2, 3]);
        assert_eq!(count(&link).await, 3);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_everything() {
        let link = link().await;
        let mut batch = link.batch();
        batch
            .queue("INSERT INTO items (name) VALUES ('a')", params![])
            .unwrap()
            .queue("INSERT INTO items (name) VALUES ('a')", params![])
            .unwrap();

        let err = batch.run().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query { .. }));
        assert!(batch.results().is_empty());
        assert!(batch.is_empty());
        assert!(!link.in_transaction());
        assert_eq!(count(&link).await, 0);
    }

    #[tokio::test]
    async fn test_empty_run_clears_previous_results() {
        let link = link().await;
        let mut batch = link.batch();
        batch
            .queue("INSERT INTO items (name) VALUES (?)", params!["a"])
            .unwrap();
        assert_eq!(batch.run().await.unwrap().len(), 1);
        assert_eq!(batch.merged_result_ids(), vec![1]);

        assert!(batch.run().await.unwrap().is_empty());
        assert!(batch.results().is_empty());
        assert!(batch.merged_result_ids().is_empty());
        assert_eq!(batch.elapsed(), Duration::ZERO);
        assert_eq!(count(&link).await, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let link = link().await;
        let mut batch = link.batch();
        batch
            .queue("INSERT INTO items (name) VALUES ('a')", params![])
            .unwrap();
        batch.cancel();

        assert!(batch.is_empty());
        assert!(batch.run().await.unwrap().is_empty());
        assert_eq!(count(&link).await, 0);
    }

    #[tokio::test]
    async fn test_queue_surfaces_preparer_errors() {
        let link = link().await;
        let mut batch = link.batch();
        let err = batch
            .queue("INSERT INTO items (name) VALUES (?)", params![])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ParameterCount { .. }));
        assert!(batch.is_empty());
    }
}
