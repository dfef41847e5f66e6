//! `worldsync_client`
//!
//! Client-side systems:
//! - Connection management and identity handshake
//! - Per-tick upstream pose/latency reporting
//! - Snapshot reconciliation into a shadow registry
//! - Interpolation for remote entity poses
//! - Rendering and viewpoint seams as traits

pub mod client;
pub mod interp;
pub mod reconcile;
pub mod shadow;

pub use client::WorldClient;
