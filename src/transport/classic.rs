//! Classic DNS transports: UDP, TCP and DNS-over-TLS (RFC 7858).
//!
//! All three share one connection-oriented state machine
//! (`Connected | Reconnecting | Closed`) behind a mutex. A query holds the
//! lock for its whole exchange, so at most one request is in flight per
//! connection and a reconnect can never swap the socket underneath it.
//!
//! When a stream read hits end-of-file the current query fails with
//! [`ClientError::ConnectionLost`] and a background task rebuilds the
//! connection from the stored configuration after a jittered 1.0–2.0 s
//! backoff, retrying a bounded number of times if the dial fails. The
//! failing query does not wait for that reconnect.

use crate::client::{DnsClient, QueryOutcome};
use crate::codec;
use crate::error::ClientError;
use crate::proxy::{BoxedStream, ProxyDialer};
use crate::tls::{self, VerifyPolicy};
use crate::transport::{read_framed, write_framed, Deadline};
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use rustls::pki_types::ServerName;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Maximum UDP response size with EDNS(0).
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Budget for dialing (and, for DoT, the TLS handshake) during construction
/// and reconnect.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Jittered wait before a background reconnect, to avoid retry storms
/// against a peer that just dropped the connection.
const RECONNECT_BACKOFF_MS: std::ops::Range<u64> = 1000..2000;

/// How many backoff rounds a background reconnect runs before giving up and
/// leaving recovery to an explicit `reconnect()` call.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Immutable configuration of a classic transport, captured at construction
/// and reused verbatim by reconnect.
#[derive(Clone, Debug)]
pub struct ClassicConfig {
    /// Target name server.
    pub server: SocketAddr,
    /// Stream-oriented (TCP) rather than datagram (UDP) transport.
    pub use_tcp: bool,
    /// Wrap the stream in TLS. Requires `use_tcp`.
    pub use_tls: bool,
    /// Server name presented during the TLS handshake; defaults to the
    /// target IP when unset.
    pub tls_name: Option<String>,
    pub verify: VerifyPolicy,
    /// Optional `socks5://` proxy URI for stream transports.
    pub proxy: Option<String>,
    /// Seed for the reconnect backoff jitter; set for deterministic tests.
    pub jitter_seed: Option<u64>,
}

impl ClassicConfig {
    pub fn udp(server: SocketAddr) -> Self {
        Self {
            server,
            use_tcp: false,
            use_tls: false,
            tls_name: None,
            verify: VerifyPolicy::Enforce,
            proxy: None,
            jitter_seed: None,
        }
    }

    pub fn tcp(server: SocketAddr) -> Self {
        Self {
            use_tcp: true,
            ..Self::udp(server)
        }
    }

    pub fn tls(server: SocketAddr, tls_name: impl Into<String>) -> Self {
        Self {
            use_tcp: true,
            use_tls: true,
            tls_name: Some(tls_name.into()),
            ..Self::udp(server)
        }
    }

    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_proxy(mut self, uri: impl Into<String>) -> Self {
        self.proxy = Some(uri.into());
        self
    }
}

enum ClassicConn {
    Datagram(UdpSocket),
    Stream(BoxedStream),
}

enum ConnState {
    Connected(ClassicConn),
    Reconnecting,
    Closed,
}

struct ClassicInner {
    config: ClassicConfig,
    state: Mutex<ConnState>,
    jitter: Jitter,
}

/// DNS over UDP, TCP or TLS behind the uniform client contract.
pub struct ClassicClient {
    inner: Arc<ClassicInner>,
}

impl std::fmt::Debug for ClassicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassicClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ClassicClient {
    /// Dial the configured server. Configuration errors (TLS without a
    /// stream transport, a non-socks5 proxy URI) are raised before any
    /// network I/O.
    pub async fn connect(config: ClassicConfig) -> Result<Self, ClientError> {
        let conn = dial(&config).await?;
        let jitter = match config.jitter_seed {
            Some(seed) => Jitter::seeded(seed),
            None => Jitter::new(),
        };

        Ok(Self {
            inner: Arc::new(ClassicInner {
                config,
                state: Mutex::new(ConnState::Connected(conn)),
                jitter,
            }),
        })
    }

    pub fn config(&self) -> &ClassicConfig {
        &self.inner.config
    }

    /// Send one query and wait for the correlated response. The elapsed time
    /// is reported on every path, including errors and timeouts.
    pub async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        let started = Instant::now();
        let result = self.exchange(message, Deadline::after(timeout)).await;
        QueryOutcome {
            result,
            elapsed: started.elapsed(),
        }
    }

    async fn exchange(
        &self,
        message: &Message,
        deadline: Deadline,
    ) -> Result<Vec<Record>, ClientError> {
        let server = self.inner.config.server.to_string();

        let mut state = deadline.run(&server, self.inner.state.lock()).await?;
        let conn = match &mut *state {
            ConnState::Connected(conn) => conn,
            ConnState::Reconnecting => return Err(ClientError::Reconnecting { server }),
            ConnState::Closed => return Err(ClientError::Closed),
        };

        let wire = codec::pack(message)?;

        let reply_wire = match conn {
            ClassicConn::Datagram(socket) => {
                deadline
                    .run(&server, socket.send(&wire))
                    .await?
                    .map_err(|e| io_error(&server, "sending query", &e))?;
                debug!(server = %server, bytes = wire.len(), "UDP query sent");

                let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
                let received = deadline
                    .run(&server, socket.recv(&mut buf))
                    .await?
                    .map_err(|e| io_error(&server, "receiving response", &e))?;
                buf.truncate(received);
                buf
            }
            ClassicConn::Stream(stream) => {
                deadline
                    .run(&server, write_framed(stream, &wire))
                    .await?
                    .map_err(|e| io_error(&server, "sending query", &e))?;
                debug!(server = %server, bytes = wire.len(), "stream query sent");

                match deadline.run(&server, read_framed(stream)).await? {
                    Ok(reply) => reply,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        *state = ConnState::Reconnecting;
                        drop(state);
                        self.schedule_reconnect();
                        return Err(ClientError::ConnectionLost { server });
                    }
                    Err(e) => return Err(io_error(&server, "receiving response", &e)),
                }
            }
        };

        let reply = codec::unpack(&reply_wire, &server)?;

        if reply.truncated() {
            return Err(ClientError::Truncated { id: reply.id() });
        }
        if reply.id() != message.id() {
            return Err(ClientError::IdMismatch {
                query: message.id(),
                response: reply.id(),
            });
        }

        debug!(server = %server, answers = reply.answers().len(), "response received");
        Ok(reply.answers().to_vec())
    }

    /// Rebuild the connection from the stored configuration and swap it into
    /// the live instance. A dial failure leaves the current state untouched.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        reconnect(&self.inner).await
    }

    /// Release the connection permanently; subsequent queries fail with
    /// [`ClientError::Closed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.inner.state.lock().await;
        if let ConnState::Connected(ClassicConn::Stream(stream)) = &mut *state {
            let _ = stream.shutdown().await;
        }
        *state = ConnState::Closed;
        Ok(())
    }

    /// Best-effort reconnect after a jittered backoff, retried with a fresh
    /// backoff on failure up to [`MAX_RECONNECT_ATTEMPTS`] times. Errors are
    /// logged rather than surfaced; the triggering query already failed. Once
    /// the attempts are exhausted, only an explicit [`reconnect`] restores
    /// service.
    ///
    /// [`reconnect`]: ClassicClient::reconnect
    fn schedule_reconnect(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
                let backoff = inner.jitter.backoff();
                debug!(
                    server = %inner.config.server,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "connection lost, reconnecting after backoff"
                );
                tokio::time::sleep(backoff).await;

                // Stop if the client was closed, or an explicit reconnect
                // already restored the connection.
                if !matches!(*inner.state.lock().await, ConnState::Reconnecting) {
                    return;
                }

                match reconnect(&inner).await {
                    Ok(()) => return,
                    Err(error) => {
                        warn!(
                            server = %inner.config.server,
                            attempt,
                            error = %error,
                            "background reconnect failed"
                        );
                    }
                }
            }
            warn!(
                server = %inner.config.server,
                "background reconnect gave up; call reconnect() to restore service"
            );
        });
    }
}

#[async_trait]
impl DnsClient for ClassicClient {
    async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        ClassicClient::query(self, message, timeout).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        ClassicClient::close(self).await
    }
}

async fn reconnect(inner: &Arc<ClassicInner>) -> Result<(), ClientError> {
    let conn = dial(&inner.config).await?;

    let mut state = inner.state.lock().await;
    if matches!(*state, ConnState::Closed) {
        return Err(ClientError::Closed);
    }
    *state = ConnState::Connected(conn);

    debug!(server = %inner.config.server, "reconnected");
    Ok(())
}

async fn dial(config: &ClassicConfig) -> Result<ClassicConn, ClientError> {
    // Configuration is validated in full before any socket is opened.
    let dialer = ProxyDialer::resolve(config.proxy.as_deref())?;

    if config.use_tls && !config.use_tcp {
        return Err(ClientError::TlsWithoutStream);
    }

    if !config.use_tcp {
        // Datagram transports are dialed directly to the target; SOCKS5
        // relaying is stream-only here, so a configured proxy is ignored.
        if !dialer.is_direct() {
            warn!(server = %config.server, "datagram transport bypasses the configured proxy");
        }

        let bind: SocketAddr = if config.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind).await.map_err(|e| ClientError::Dial {
            server: config.server.to_string(),
            reason: format!("binding UDP socket: {e}"),
        })?;
        socket
            .connect(config.server)
            .await
            .map_err(|e| ClientError::Dial {
                server: config.server.to_string(),
                reason: e.to_string(),
            })?;

        return Ok(ClassicConn::Datagram(socket));
    }

    let stream = tokio::time::timeout(DIAL_TIMEOUT, dialer.dial(config.server))
        .await
        .map_err(|_| ClientError::Timeout {
            server: config.server.to_string(),
        })??;

    if !config.use_tls {
        return Ok(ClassicConn::Stream(stream));
    }

    let tls_config = Arc::new(tls::client_config(config.verify, &[]));
    let name = config
        .tls_name
        .clone()
        .unwrap_or_else(|| config.server.ip().to_string());
    let server_name = ServerName::try_from(name.clone())
        .map_err(|e| ClientError::Config(format!("invalid TLS server name '{name}': {e}")))?;

    let connector = TlsConnector::from(tls_config);
    let tls_stream = tokio::time::timeout(DIAL_TIMEOUT, connector.connect(server_name, stream))
        .await
        .map_err(|_| ClientError::Timeout {
            server: config.server.to_string(),
        })?
        .map_err(|e| ClientError::Handshake {
            server: config.server.to_string(),
            reason: e.to_string(),
        })?;

    debug!(server = %config.server, tls_name = %name, "TLS connection established");
    Ok(ClassicConn::Stream(Box::new(tls_stream)))
}

fn io_error(server: &str, action: &str, error: &io::Error) -> ClientError {
    ClientError::Io {
        server: server.to_string(),
        reason: format!("{action}: {error}"),
    }
}

/// Injectable randomness for the reconnect backoff, seedable for tests.
struct Jitter {
    rng: std::sync::Mutex<fastrand::Rng>,
}

impl Jitter {
    fn new() -> Self {
        Self {
            rng: std::sync::Mutex::new(fastrand::Rng::new()),
        }
    }

    fn seeded(seed: u64) -> Self {
        Self {
            rng: std::sync::Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    fn backoff(&self) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_millis(rng.u64(RECONNECT_BACKOFF_MS))
    }
}
