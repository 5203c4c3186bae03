pub mod clause;
pub mod config;
pub mod ddl;
pub mod driver;
pub mod error;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod validation;

pub use config::Config;
pub use driver::{Connection, Dialect, SqliteConnection};
pub use error::{NatKeyError, Result};
pub use schema::{Row, Schema};
pub use store::{SaveMode, Store};
