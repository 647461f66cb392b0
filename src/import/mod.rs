pub mod bulk;
pub mod gateway;
pub mod reader;
pub mod validate;

pub use bulk::{bulk_import, ImportOptions};
pub use gateway::SqliteGateway;
