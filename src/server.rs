// CLASSIFICATION: COMMUNITY
// Filename: server.rs v0.9
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Listener lifecycle management.
//!
//! A [`TelemetryServer`] owns the registry of running listeners (at most
//! one per TCP port) and the single record queue their handlers feed. It is
//! an ordinary constructed object rather than ambient static state, so
//! independent instances can coexist in tests.

use crate::addr::{detect_primary_addr, DetectError};
use crate::handler::{DialoutHandler, OutputMode};
use crate::protocol::{GRpcMdtDialoutServer, DEFAULT_PORT};
use crate::queue::RecordQueue;
use log::{error, info};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};

const CERT_DIR_ENV: &str = "MDT_DIALOUT_CERT_DIR";
const DEFAULT_CERT_DIR: &str = "/etc/mdt-dialout/certs";

/// Errors raised by listener lifecycle operations.
///
/// `AlreadyRunning` and `NotRunning` are ordinary recoverable outcomes;
/// the remaining variants are loud configuration or bind failures. All
/// render as operator-displayable messages.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("a listener is already running on port {0}")]
    AlreadyRunning(u16),
    #[error("no listener is running on port {0}; retry after starting one")]
    NotRunning(u16),
    #[error("TLS requested for device {0} but no user was supplied")]
    MissingUser(String),
    #[error("server certificate not found at {}", .0.display())]
    MissingCertificate(PathBuf),
    #[error("server private key not found at {}", .0.display())]
    MissingKey(PathBuf),
    #[error("failed to read TLS material {path}: {source}")]
    CertRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure TLS: {0}")]
    Tls(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("could not detect a primary outbound address: {0}")]
    AddressDetection(#[from] DetectError),
}

/// Options for starting one listener.
#[derive(Clone, Debug)]
pub struct StartOptions {
    /// Explicit bind address; defaults to the detected primary outbound IP.
    pub address: Option<IpAddr>,
    /// TCP port; 0 binds an ephemeral port.
    pub port: u16,
    /// Certificate store owner, required when `device` is set.
    pub user: Option<String>,
    /// Device identity; presence switches the listener to TLS using the
    /// per-user, per-device server certificate and key.
    pub device: Option<String>,
    pub mode: OutputMode,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_PORT,
            user: None,
            device: None,
            mode: OutputMode::default(),
        }
    }
}

/// Successful start outcome.
#[derive(Debug)]
pub struct StartedListener {
    /// Resolved port (differs from the requested port only for port 0).
    pub port: u16,
    pub addr: SocketAddr,
    /// Confirmation message naming address and port.
    pub message: String,
}

struct Registration {
    addr: SocketAddr,
    handler: Arc<DialoutHandler>,
    tls: bool,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Point-in-time snapshot of one registration for introspection.
#[derive(Clone)]
pub struct RegistrationInfo {
    pub port: u16,
    pub addr: SocketAddr,
    pub handler: Arc<DialoutHandler>,
    pub tls: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

/// Manager for dial-out listeners and their shared record queue.
pub struct TelemetryServer {
    registry: Mutex<HashMap<u16, Registration>>,
    queue: Arc<RecordQueue>,
    cert_dir: PathBuf,
}

impl Default for TelemetryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryServer {
    pub fn new() -> Self {
        let cert_dir = env::var(CERT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERT_DIR));
        Self::with_cert_dir(cert_dir)
    }

    /// Construct a manager using an explicit certificate store root.
    pub fn with_cert_dir(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            queue: Arc::new(RecordQueue::new()),
            cert_dir: cert_dir.into(),
        }
    }

    /// The queue every listener's handler appends to.
    pub fn queue(&self) -> Arc<RecordQueue> {
        self.queue.clone()
    }

    /// Start a listener. Fails without side effects when the port is
    /// already registered, TLS material is missing, or the bind fails.
    pub async fn start(&self, opts: StartOptions) -> Result<StartedListener, ServerError> {
        if opts.port != 0 && self.lock_registry().contains_key(&opts.port) {
            return Err(ServerError::AlreadyRunning(opts.port));
        }

        let ip = match opts.address {
            Some(ip) => ip,
            None => detect_primary_addr()?,
        };

        let mut identity = None;
        let mut cert_path = None;
        let mut key_path = None;
        if let Some(device) = &opts.device {
            let user = opts
                .user
                .as_deref()
                .ok_or_else(|| ServerError::MissingUser(device.clone()))?;
            let dir = self.cert_dir.join(user).join(device);
            let cert = dir.join("server.crt");
            let key = dir.join("server.key");
            if !cert.is_file() {
                return Err(ServerError::MissingCertificate(cert));
            }
            if !key.is_file() {
                return Err(ServerError::MissingKey(key));
            }
            identity = Some(Identity::from_pem(read_pem(&cert)?, read_pem(&key)?));
            cert_path = Some(cert);
            key_path = Some(key);
        }
        let tls = identity.is_some();

        let requested = SocketAddr::new(ip, opts.port);
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| ServerError::Bind {
                addr: requested,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;
        let port = addr.port();

        let handler = Arc::new(DialoutHandler::new(self.queue.clone(), opts.mode));
        let mut builder = Server::builder();
        if let Some(identity) = identity {
            builder = builder
                .tls_config(ServerTlsConfig::new().identity(identity))
                .map_err(|err| ServerError::Tls(err.to_string()))?;
        }
        let router = builder.add_service(GRpcMdtDialoutServer::from_arc(handler.clone()));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let result = router
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!("listener on {addr} terminated: {err}");
            }
        });

        let mut registry = self.lock_registry();
        if registry.contains_key(&port) {
            // Lost a start race on the same port.
            drop(registry);
            task.abort();
            return Err(ServerError::AlreadyRunning(port));
        }
        registry.insert(
            port,
            Registration {
                addr,
                handler,
                tls,
                cert_path,
                key_path,
                shutdown: Some(shutdown_tx),
                task,
            },
        );
        drop(registry);

        let scheme = if tls { "TLS" } else { "plaintext" };
        let message = format!("dial-out listener running on {addr} ({scheme})");
        info!("{message}");
        Ok(StartedListener {
            port,
            addr,
            message,
        })
    }

    /// Gracefully stop the listener on `port`, letting in-flight streams
    /// finish before the task is reaped.
    pub async fn stop(&self, port: u16) -> Result<String, ServerError> {
        let registration = self.lock_registry().remove(&port);
        let Some(mut registration) = registration else {
            return Err(ServerError::NotRunning(port));
        };
        if let Some(tx) = registration.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = registration.task.await {
            error!("listener task on port {port} failed during shutdown: {err}");
        }
        let message = format!("dial-out listener on port {port} stopped");
        info!("{message}");
        Ok(message)
    }

    /// Pure lookup of the live registration for `port`.
    pub fn get(&self, port: u16) -> Option<RegistrationInfo> {
        self.lock_registry().get(&port).map(|reg| RegistrationInfo {
            port,
            addr: reg.addr,
            handler: reg.handler.clone(),
            tls: reg.tls,
            cert_path: reg.cert_path.clone(),
            key_path: reg.key_path.clone(),
        })
    }

    /// Ports with a currently registered listener.
    pub fn registered_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.lock_registry().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Registration>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    fs::read(path).map_err(|source| ServerError::CertRead {
        path: path.into(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::runtime::Runtime;

    fn loopback_opts(port: u16) -> StartOptions {
        StartOptions {
            address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port,
            ..StartOptions::default()
        }
    }

    #[test]
    fn double_start_is_rejected_with_one_registration() {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let server = TelemetryServer::with_cert_dir("/nonexistent");
            let started = server.start(loopback_opts(0)).await.expect("start");
            let err = server
                .start(loopback_opts(started.port))
                .await
                .expect_err("second start must fail");
            assert!(matches!(err, ServerError::AlreadyRunning(p) if p == started.port));
            assert_eq!(server.registered_ports(), vec![started.port]);
            server.stop(started.port).await.expect("stop");
        });
    }

    #[test]
    fn stop_then_restart_yields_fresh_handler() {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let server = TelemetryServer::with_cert_dir("/nonexistent");
            let started = server.start(loopback_opts(0)).await.expect("start");
            let first = server.get(started.port).expect("registration").handler;
            server.stop(started.port).await.expect("stop");
            assert!(server.get(started.port).is_none());

            let restarted = server
                .start(loopback_opts(started.port))
                .await
                .expect("restart on freed port");
            assert_eq!(restarted.port, started.port);
            let second = server.get(started.port).expect("registration").handler;
            assert!(!Arc::ptr_eq(&first, &second));
            server.stop(started.port).await.expect("stop again");
        });
    }

    #[test]
    fn stop_on_unregistered_port_signals_retry() {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let server = TelemetryServer::with_cert_dir("/nonexistent");
            let err = server.stop(4242).await.expect_err("nothing to stop");
            assert!(matches!(err, ServerError::NotRunning(4242)));
            assert!(err.to_string().contains("retry"));
        });
    }

    #[test]
    fn tls_start_without_certificate_fails_cleanly() {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let server = TelemetryServer::with_cert_dir(dir.path());
            let opts = StartOptions {
                user: Some("admin".into()),
                device: Some("router1".into()),
                ..loopback_opts(0)
            };
            let err = server.start(opts).await.expect_err("missing cert");
            assert!(matches!(err, ServerError::MissingCertificate(_)));
            assert!(server.registered_ports().is_empty());
        });
    }

    #[test]
    fn tls_start_without_user_fails_cleanly() {
        let rt = Runtime::new().expect("runtime");
        rt.block_on(async {
            let server = TelemetryServer::with_cert_dir("/nonexistent");
            let opts = StartOptions {
                device: Some("router1".into()),
                ..loopback_opts(0)
            };
            let err = server.start(opts).await.expect_err("missing user");
            assert!(matches!(err, ServerError::MissingUser(_)));
        });
    }
}
