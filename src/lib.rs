pub mod azure;
pub mod batch;
pub mod compare;
pub mod config;
pub mod error;
pub mod harness;
pub mod memory;
pub mod prune;
pub mod pushdown;
pub mod roundtrip;
pub mod schema;
pub mod warehouse;

pub use azure::azure_sas_key;
pub use error::{Result, SnowcheckError};
pub use harness::Harness;
pub use pushdown::PushdownCheck;
pub use warehouse::{Connection, ConnectorOptions, DataSession, QueryRecorder, SaveMode};
