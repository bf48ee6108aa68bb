//! RPC-shaped methods for both cores.
//!
//! Two namespaces: `xdpos_*` over the consensus engine's query and voting
//! surface, `beacon_*` over the light-client content network and the
//! overlay management handle. Transport and method dispatch are the
//! host's concern; every method here takes parsed parameters and returns
//! structured JSON or an [`error::RpcError`] with a stable numeric code.

pub mod beacon;
pub mod error;
pub mod xdpos;

pub use beacon::{BeaconRpc, OverlayAdmin};
pub use error::RpcError;
pub use xdpos::XdposRpc;
