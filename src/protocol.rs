// CLASSIFICATION: COMMUNITY
// Filename: protocol.rs v0.3
// Author: Lukas Bower
// Date Modified: 2029-04-02

/// Generated bindings for the dial-out service.
#[allow(clippy::all)]
pub mod dialout {
    tonic::include_proto!("mdt_dialout");
}

/// Generated bindings for the telemetry envelope schema.
#[allow(clippy::all)]
pub mod telemetry {
    tonic::include_proto!("telemetry");
}

pub use dialout::g_rpc_mdt_dialout_client::GRpcMdtDialoutClient;
pub use dialout::g_rpc_mdt_dialout_server::{GRpcMdtDialout, GRpcMdtDialoutServer};
pub use dialout::MdtDialoutArgs;
pub use telemetry::telemetry_field;
pub use telemetry::{telemetry_field::ValueByType, Telemetry, TelemetryField};

/// Default dial-out listener port.
pub const DEFAULT_PORT: u16 = 5678;
