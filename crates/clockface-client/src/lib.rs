//! clockface-client: JSON-RPC adapter for the attendance server.
//!
//! [`RpcClient`] implements the core's `Verifier`, `AttendanceNotifier`
//! and `SettingsSource` ports over HTTP.

pub mod attendance;
pub mod rpc;

pub use rpc::{ClientConfig, RpcClient};
