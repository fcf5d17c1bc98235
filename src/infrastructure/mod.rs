pub mod address_store;
pub mod encryption;
pub mod event_bus;
pub mod log_redact;
pub mod logging;
pub mod password;
pub mod pbkdf2;
pub mod safe_api;
pub mod safe_contract;
pub mod task_pool;
pub mod transport_queue;
pub mod vault_store;
