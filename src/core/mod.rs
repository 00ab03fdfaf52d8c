//! Core toolkit types
//!
//! Value escaping, template preparation, query building, connection routing,
//! transactional batches and result shaping. Backend drivers live in
//! [`crate::backends`].

pub mod agent;
pub mod batch;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod escaper;
pub mod link;
pub mod linker;
pub mod params;
pub mod preparer;
pub mod query_builder;
pub mod result;
pub mod value;

// Re-export commonly used types
pub use agent::Agent;
pub use batch::Batch;
pub use config::{Credentials, DatabaseConfig, ErrorHandler, ResolvedCredentials, Settings};
pub use database::Database;
pub use driver::{DefaultDriverFactory, Driver, DriverFactory};
pub use error::{DatabaseError, Result};
pub use escaper::Escaper;
pub use link::{Link, LinkStatus, Role};
pub use linker::Linker;
pub use params::Params;
pub use preparer::Preparer;
pub use query_builder::{
    AggregateFn, Connective, JoinType, LikeMode, Operator, OrderDirection, QueryBuilder,
};
pub use result::{FetchType, FetchedRow, QueryResult, RawResultSet, Record, ResultProcessor};
pub use value::{DatabaseRow, DatabaseValue};
