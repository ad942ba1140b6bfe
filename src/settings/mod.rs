// Per-device settings persistence.

pub mod store;
pub mod types;
