//! OrientDB binary protocol driver
//!
//! Async client for the OrientDB binary protocol: record CRUD, SQL queries
//! and commands, and reconstruction of linked record graphs from prefetched
//! results.
//!
//! # Example
//!
//! ```no_run
//! use orientdb_driver::{CreateOptions, GetOptions, OrientClientBuilder, QueryOptions, Record};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), orientdb_driver::DriverError> {
//!     let db = OrientClientBuilder::new("localhost:2424")
//!         .session_id(7)
//!         .cluster("Person", 11)
//!         .build()
//!         .await?;
//!
//!     let ada = db
//!         .create(Record::with_class("Person").with("name", "Ada"), CreateOptions::default())
//!         .await?;
//!     let loaded = db.get(ada.rid().unwrap(), GetOptions::fetch_plan("*:1")).await?;
//!     println!("{}", loaded.to_json());
//!
//!     let rows = db
//!         .query(
//!             "select from Person where name = :name",
//!             QueryOptions::default().param("name", "Ada"),
//!         )
//!         .await?;
//!     println!("{} rows", rows.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;

pub use client::{
    ClientConfig, ClusterCache, ClusterLookup, ClusterTarget, Connection, CreateOptions, Database,
    DeleteOptions, GetOptions, OrientClientBuilder, Pending, QueryOptions, RecordArg, Transport,
    UpdateOptions,
};
pub use error::{DriverError, DriverResult, FormatError, RequestError};
pub use protocol::{Record, RecordId, RecordRef, RecordType, Value};
