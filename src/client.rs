//! Uniform client contract and the URI dispatcher.

use crate::error::ClientError;
use crate::tls::VerifyPolicy;
use crate::transport::classic::{ClassicClient, ClassicConfig};
use crate::transport::doh::DohClient;
use crate::transport::doq::DoqClient;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

const DEFAULT_DNS_PORT: u16 = 53;
const DEFAULT_TLS_PORT: u16 = 853;
const DEFAULT_QUIC_PORT: u16 = 853;

/// Result of one query attempt. `elapsed` is measured from call entry to
/// return and is present on every path, success and failure alike.
#[derive(Debug)]
pub struct QueryOutcome {
    pub result: Result<Vec<Record>, ClientError>,
    pub elapsed: Duration,
}

impl QueryOutcome {
    /// Consume the outcome, keeping only the answers.
    pub fn into_answers(self) -> Result<Vec<Record>, ClientError> {
        self.result
    }
}

/// Capability set every transport variant implements.
///
/// `query` sends one message over the transport's connection and waits for
/// the correlated response, never blocking past `timeout`: the deadline is
/// propagated onto the underlying I/O, so an expired timeout unblocks the
/// exchange itself. Safe to call repeatedly on the same instance. `close`
/// releases the connection permanently; queries after `close` fail with
/// [`ClientError::Closed`].
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome;

    async fn close(&self) -> Result<(), ClientError>;
}

/// A DNS client over any supported transport.
#[derive(Debug)]
pub enum Client {
    Classic(ClassicClient),
    Doh(DohClient),
    Doq(DoqClient),
}

impl Client {
    /// Construct the matching transport for a connection URI:
    ///
    /// - `udp://1.1.1.1:53`, `udp6://[2606:4700:4700::1111]:53`
    /// - `tcp://9.9.9.9:5353`, `tcp6://…`
    /// - `tls://dns.adguard.com:853`, `tls6://…`
    /// - `https://dns.adguard.com/dns-query`
    /// - `quic://dns.adguard.com:8853`
    ///
    /// A missing port defaults to the protocol standard (53 for UDP/TCP,
    /// 853 for DoT and DoQ). Unrecognized schemes are a configuration error.
    /// `proxy`, when set, must be a `socks5://` URI and applies to the
    /// stream-oriented transports.
    pub async fn from_uri(
        uri: &str,
        verify: VerifyPolicy,
        proxy: Option<&str>,
    ) -> Result<Self, ClientError> {
        let parsed = Url::parse(uri).map_err(|_| ClientError::InvalidUri(uri.to_string()))?;

        match parsed.scheme() {
            "udp" | "udp6" => {
                let server = resolve_addr(&parsed, DEFAULT_DNS_PORT).await?;
                let mut config = ClassicConfig::udp(server).with_verify(verify);
                config.proxy = proxy.map(str::to_string);
                Ok(Self::Classic(ClassicClient::connect(config).await?))
            }
            "tcp" | "tcp6" => {
                let server = resolve_addr(&parsed, DEFAULT_DNS_PORT).await?;
                let mut config = ClassicConfig::tcp(server).with_verify(verify);
                config.proxy = proxy.map(str::to_string);
                Ok(Self::Classic(ClassicClient::connect(config).await?))
            }
            "tls" | "tls6" => {
                let server = resolve_addr(&parsed, DEFAULT_TLS_PORT).await?;
                let name = host_string(&parsed)?;
                let mut config = ClassicConfig::tls(server, name).with_verify(verify);
                config.proxy = proxy.map(str::to_string);
                Ok(Self::Classic(ClassicClient::connect(config).await?))
            }
            "https" => Ok(Self::Doh(DohClient::connect(parsed, verify, proxy).await?)),
            "quic" => {
                let host = host_string(&parsed)?;
                let port = parsed.port().unwrap_or(DEFAULT_QUIC_PORT);
                if proxy.is_some_and(|uri| !uri.is_empty()) {
                    return Err(ClientError::Config(
                        "proxying is not supported for DNS over QUIC".to_string(),
                    ));
                }
                Ok(Self::Doq(
                    DoqClient::connect(&format!("{host}:{port}"), verify).await?,
                ))
            }
            other => Err(ClientError::UnsupportedScheme(other.to_string())),
        }
    }

    pub async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        match self {
            Self::Classic(client) => client.query(message, timeout).await,
            Self::Doh(client) => client.query(message, timeout).await,
            Self::Doq(client) => client.query(message, timeout).await,
        }
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        match self {
            Self::Classic(client) => client.close().await,
            Self::Doh(client) => client.close().await,
            Self::Doq(client) => client.close().await,
        }
    }

    /// Rebuild the live connection or session from the stored configuration.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        match self {
            Self::Classic(client) => client.reconnect().await,
            Self::Doh(client) => client.reconnect().await,
            Self::Doq(client) => client.reconnect().await,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::Classic(client) => {
                let config = client.config();
                if config.use_tls {
                    "TLS"
                } else if config.use_tcp {
                    "TCP"
                } else {
                    "UDP"
                }
            }
            Self::Doh(_) => "HTTPS",
            Self::Doq(_) => "QUIC",
        }
    }
}

#[async_trait]
impl DnsClient for Client {
    async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        Client::query(self, message, timeout).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        Client::close(self).await
    }
}

fn host_string(url: &Url) -> Result<String, ClientError> {
    match url.host() {
        Some(url::Host::Domain(domain)) => Ok(domain.to_string()),
        Some(url::Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(url::Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(ClientError::InvalidUri(url.to_string())),
    }
}

async fn resolve_addr(url: &Url, default_port: u16) -> Result<SocketAddr, ClientError> {
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::InvalidUri(url.to_string()))?;
    let port = url.port().unwrap_or(default_port);
    let target = format!("{host}:{port}");

    let resolved = tokio::net::lookup_host(target.as_str())
        .await
        .map_err(|e| ClientError::Dial {
            server: target.clone(),
            reason: e.to_string(),
        })?
        .next();
    resolved.ok_or_else(|| ClientError::Dial {
        server: target,
        reason: "no addresses resolved".to_string(),
    })
}
