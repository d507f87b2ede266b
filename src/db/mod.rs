pub mod memory_secret_store;
pub mod postgres_secret_store;
pub mod secret_store;
