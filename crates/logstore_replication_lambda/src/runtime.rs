pub use logstore_replication_core::{contract, error, retry, settings};
