//! `worldsync_server`
//!
//! Server-side systems:
//! - Session lifecycle (connect, identity handshake, disconnect cleanup)
//! - Fixed timestep simulation loop
//! - Scenario switching
//! - Broadcasts full-world `Snapshot`s every tick
//!
//! Networking model: one framed TCP connection per session; per-session
//! writer tasks make the broadcast fire-and-forget.

pub mod server;

pub use server::WorldServer;
