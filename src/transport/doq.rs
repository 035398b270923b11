//! DNS-over-QUIC client (RFC 9250).
//!
//! One QUIC session per client; one bidirectional stream per query. Streams
//! correlate requests and responses by themselves, so the DNS message id is
//! forced to zero on the wire (RFC 9250 §4.2.1). The EDNS0 TCP-keepalive
//! option is specific to TCP/TLS transports and must not appear on a DoQ
//! connection (RFC 9250 §5.5.2); a message carrying it is rejected and the
//! session closed with a protocol error. Proxying is not supported on this
//! transport.

use crate::cache::{self, MessageCache};
use crate::client::{DnsClient, QueryOutcome};
use crate::codec;
use crate::error::ClientError;
use crate::tls::{self, VerifyPolicy};
use crate::transport::Deadline;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;
use hickory_proto::rr::Record;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::VarInt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DOQ_ALPN: &[u8] = b"doq";

/// Bounded budget for the QUIC handshake during construction and reconnect.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest response body a stream read will collect.
const MAX_RESPONSE_SIZE: usize = 65535;

/// DOQ_NO_ERROR application close code (RFC 9250 §8.4).
const DOQ_NO_ERROR: u32 = 0x0;

/// DOQ_PROTOCOL_ERROR application close code (RFC 9250 §8.4).
const DOQ_PROTOCOL_ERROR: u32 = 0x2;

enum SessionState {
    Open(quinn::Connection),
    Closed,
}

/// DNS-over-QUIC client with a private response cache.
pub struct DoqClient {
    server: String,
    addr: SocketAddr,
    server_name: String,
    verify: VerifyPolicy,
    endpoint: quinn::Endpoint,
    session: Mutex<SessionState>,
    cache: MessageCache,
}

impl std::fmt::Debug for DoqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoqClient")
            .field("server", &self.server)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl DoqClient {
    /// Dial a QUIC session to `server` (`host:port`) and negotiate the `doq`
    /// application protocol within a bounded handshake timeout.
    pub async fn connect(server: &str, verify: VerifyPolicy) -> Result<Self, ClientError> {
        let addr = tokio::net::lookup_host(server)
            .await
            .map_err(|e| ClientError::Dial {
                server: server.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ClientError::Dial {
                server: server.to_string(),
                reason: "no addresses resolved".to_string(),
            })?;
        let server_name = host_part(server);

        let tls_config = tls::client_config(verify, &[DOQ_ALPN]);
        let quic_tls = QuicClientConfig::try_from(Arc::new(tls_config))
            .map_err(|e| ClientError::Config(format!("QUIC TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_tls));

        let bind: SocketAddr = if addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(|e| ClientError::Dial {
            server: server.to_string(),
            reason: format!("creating QUIC endpoint: {e}"),
        })?;
        endpoint.set_default_client_config(client_config);

        let session = dial_session(&endpoint, addr, &server_name, server).await?;

        Ok(Self {
            server: server.to_string(),
            addr,
            server_name,
            verify,
            endpoint,
            session: Mutex::new(SessionState::Open(session)),
            cache: MessageCache::with_sweeper(),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        self.verify
    }

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
        if let Some(fingerprint) = cache::fingerprint(message) {
            if let Some(answers) = self.cache.get(message) {
                self.cache.update(fingerprint);
                debug!(server = %self.server, "cache hit");
                return Ok(answers);
            }
        }

        if has_tcp_keepalive(message) {
            // RFC 9250 §5.5.2: the option is specific to TCP/TLS transports.
            self.close_session(DOQ_PROTOCOL_ERROR, b"edns-tcp-keepalive not allowed")
                .await;
            return Err(ClientError::KeepaliveOverQuic);
        }

        let session = {
            let state = deadline.run(&self.server, self.session.lock()).await?;
            match &*state {
                SessionState::Open(session) => session.clone(),
                SessionState::Closed => return Err(ClientError::Closed),
            }
        };

        let wire = pack_stream_query(message)?;

        let (mut send, mut recv) = deadline
            .run(&self.server, session.open_bi())
            .await?
            .map_err(|e| ClientError::Io {
                server: self.server.clone(),
                reason: format!("opening stream: {e}"),
            })?;

        deadline
            .run(&self.server, send.write_all(&wire))
            .await?
            .map_err(|e| ClientError::Io {
                server: self.server.clone(),
                reason: format!("writing query: {e}"),
            })?;

        // RFC 9250 §4.2: a FIN signals that no further data follows the
        // query on this stream.
        send.finish().map_err(|e| ClientError::Io {
            server: self.server.clone(),
            reason: format!("finishing stream: {e}"),
        })?;

        let body = deadline
            .run(&self.server, recv.read_to_end(MAX_RESPONSE_SIZE))
            .await?
            .map_err(|e| ClientError::Io {
                server: self.server.clone(),
                reason: format!("reading response: {e}"),
            })?;

        if body.is_empty() {
            return Err(ClientError::EmptyResponse {
                server: self.server.clone(),
            });
        }

        let reply = codec::unpack(&body, &self.server)?;
        debug!(server = %self.server, answers = reply.answers().len(), "DoQ response received");

        let answers = reply.answers().to_vec();
        self.cache.add(message, &answers);
        Ok(answers)
    }

    /// Dial a fresh session from the stored server address and verification
    /// policy, then replace the live session. Also revives a client whose
    /// session was closed by a protocol error.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let fresh = dial_session(&self.endpoint, self.addr, &self.server_name, &self.server).await?;

        let mut state = self.session.lock().await;
        if let SessionState::Open(old) = &*state {
            old.close(VarInt::from_u32(DOQ_NO_ERROR), b"");
        }
        *state = SessionState::Open(fresh);

        debug!(server = %self.server, "DoQ session replaced");
        Ok(())
    }

    /// Application-level close with `DOQ_NO_ERROR`.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.close_session(DOQ_NO_ERROR, b"").await;
        self.cache.shutdown();
        Ok(())
    }

    async fn close_session(&self, code: u32, reason: &[u8]) {
        let mut state = self.session.lock().await;
        if let SessionState::Open(session) = &*state {
            session.close(VarInt::from_u32(code), reason);
            if code != DOQ_NO_ERROR {
                warn!(server = %self.server, code, "DoQ session closed with protocol error");
            }
        }
        *state = SessionState::Closed;
    }
}

#[async_trait]
impl DnsClient for DoqClient {
    async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        DoqClient::query(self, message, timeout).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        DoqClient::close(self).await
    }
}

async fn dial_session(
    endpoint: &quinn::Endpoint,
    addr: SocketAddr,
    server_name: &str,
    server: &str,
) -> Result<quinn::Connection, ClientError> {
    let connecting = endpoint
        .connect(addr, server_name)
        .map_err(|e| ClientError::Dial {
            server: server.to_string(),
            reason: e.to_string(),
        })?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, connecting)
        .await
        .map_err(|_| ClientError::Timeout {
            server: server.to_string(),
        })?
        .map_err(|e| ClientError::Handshake {
            server: server.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize a query for a DoQ stream. The id on the wire must be zero
/// (RFC 9250 §4.2.1); the stream itself provides correlation, and the
/// caller's message is left untouched.
fn pack_stream_query(message: &Message) -> Result<Vec<u8>, ClientError> {
    let mut wire = codec::pack(message)?;
    wire[0] = 0;
    wire[1] = 0;
    Ok(wire)
}

fn has_tcp_keepalive(message: &Message) -> bool {
    message
        .extensions()
        .as_ref()
        .and_then(|edns| edns.option(EdnsCode::Keepalive))
        .is_some()
}

/// Host component of a `host:port` string, brackets stripped for IPv6.
fn host_part(server: &str) -> String {
    let host = match server.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => server,
    };
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}
