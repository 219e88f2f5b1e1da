//! agromesh-core: mesh wire format, integrity trailer, fingerprints and config.
//! All other agromesh crates depend on this one.

pub mod config;
pub mod fingerprint;
pub mod integrity;
pub mod wire;

pub use fingerprint::Fingerprint;
pub use wire::{ErrorResponse, NodeAddress, Packet, PacketKind, Request, SuccessResponse};
