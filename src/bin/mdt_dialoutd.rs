// CLASSIFICATION: COMMUNITY
// Filename: mdt_dialoutd.rs v0.3
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Standalone dial-out receiver daemon: one listener plus a periodic
//! drain of the record queue into the configured sinks.

use clap::{Parser, Subcommand};
use log::{info, warn};
use mdt_dialout::protocol::DEFAULT_PORT;
use mdt_dialout::sink::{DispatchEntry, OutputDispatcher};
use mdt_dialout::{OutputMode, StartOptions, TelemetryServer};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "mdt-dialoutd",
    about = "gRPC model-driven telemetry dial-out receiver",
    version = "0.1"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dial-out listener and periodically drain the record queue.
    Serve {
        /// Bind address; defaults to the detected primary outbound IP.
        #[arg(long)]
        address: Option<IpAddr>,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Certificate store owner; required together with --device.
        #[arg(long)]
        user: Option<String>,
        /// Device identity; enables TLS with that device's cert/key pair.
        #[arg(long)]
        device: Option<String>,
        /// Queue raw envelope dumps instead of structured records.
        #[arg(long)]
        raw: bool,
        /// Append drained records to this file as JSON documents.
        #[arg(long)]
        output_file: Option<PathBuf>,
        /// Index drained records into this endpoint.
        #[arg(long)]
        elastic_uri: Option<String>,
        #[arg(long, default_value_t = 10)]
        drain_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            address,
            port,
            user,
            device,
            raw,
            output_file,
            elastic_uri,
            drain_interval_secs,
        } => {
            let server = TelemetryServer::new();
            let mut dispatcher = OutputDispatcher::new(server.queue());
            dispatcher.set_output(output_file.as_deref(), elastic_uri.as_deref())?;

            let mode = if raw {
                OutputMode::Raw
            } else {
                OutputMode::Compact
            };
            let started = server
                .start(StartOptions {
                    address,
                    port,
                    user,
                    device,
                    mode,
                })
                .await?;
            info!("{}", started.message);

            let interval = Duration::from_secs(drain_interval_secs.max(1));
            loop {
                tokio::time::sleep(interval).await;
                for entry in dispatcher.drain() {
                    match entry {
                        DispatchEntry::Record(record) => match serde_json::to_string(&record) {
                            Ok(doc) => info!("record: {doc}"),
                            Err(err) => warn!("record not serializable: {err}"),
                        },
                        DispatchEntry::SinkFailure { sink, detail } => {
                            warn!("sink {sink} failed: {detail}");
                        }
                    }
                }
            }
        }
    }
}
