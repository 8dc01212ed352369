pub mod http_log_store;
pub mod log_store;
