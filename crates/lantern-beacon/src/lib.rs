//! Beacon light-client core: domain types, fork-tagged SSZ codec, proof
//! verification, and the store tracking the finalized and optimistic heads.
//!
//! This crate is transport-free. Networking and persistence live in
//! `lantern-portal`; nothing here does I/O beyond logging.

pub mod codec;
pub mod config;
pub mod fork;
pub mod store;
pub mod types;
pub mod verify;

pub use config::LightClientConfig;
pub use fork::{Fork, ForkSchedule};
pub use store::LightClientStore;
pub use verify::VerifyError;
