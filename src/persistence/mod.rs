//! Registry persistence: JSON snapshot read/write for `registry.json`,
//! and the file-locked read-modify-write path used by
//! `update_monitor_settings`.

pub mod registry_store;

pub use registry_store::RegistryStore;
