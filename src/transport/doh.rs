//! DNS-over-HTTPS client (RFC 8484, GET wire format).
//!
//! One long-lived HTTP/2 client plays the role of the connection: the query
//! is packed, base64url-encoded without padding and carried in the `dns`
//! query parameter. The response body is unpacked as a DNS message
//! regardless of HTTP status, because DNS-level failures travel in the body.
//! No retry happens at this layer; the HTTP client's own pooling and
//! reconnection sit below it.

use crate::cache::{self, MessageCache};
use crate::client::{DnsClient, QueryOutcome};
use crate::codec;
use crate::error::ClientError;
use crate::proxy::ProxyDialer;
use crate::tls::VerifyPolicy;
use crate::transport::Deadline;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// DNS-over-HTTPS client with a private response cache.
pub struct DohClient {
    url: Url,
    verify: VerifyPolicy,
    proxy: Option<String>,
    http: ArcSwap<reqwest::Client>,
    cache: MessageCache,
    closed: AtomicBool,
}

impl std::fmt::Debug for DohClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohClient")
            .field("url", &self.url)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl DohClient {
    /// Build the long-lived HTTP client against `url`. The proxy URI, when
    /// present, must use the `socks5` scheme; validation happens before any
    /// network I/O.
    pub async fn connect(
        url: Url,
        verify: VerifyPolicy,
        proxy: Option<&str>,
    ) -> Result<Self, ClientError> {
        let http = build_http_client(verify, proxy)?;

        Ok(Self {
            url,
            verify,
            proxy: proxy.filter(|uri| !uri.is_empty()).map(str::to_string),
            http: ArcSwap::from_pointee(http),
            cache: MessageCache::with_sweeper(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
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
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        // A cache hit bypasses the network entirely.
        if let Some(fingerprint) = cache::fingerprint(message) {
            if let Some(answers) = self.cache.get(message) {
                self.cache.update(fingerprint);
                debug!(url = %self.url, "cache hit");
                return Ok(answers);
            }
        }

        let wire = codec::pack(message)?;
        let dns_param = URL_SAFE_NO_PAD.encode(&wire);

        let http = self.http.load();
        let response = http
            .get(self.url.clone())
            .query(&[("dns", dns_param.as_str())])
            .timeout(deadline.remaining())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        debug!(url = %self.url, status = status.as_u16(), bytes = body.len(), "DoH response received");

        let reply = codec::unpack(&body, self.url.as_str())?;
        let answers = reply.answers().to_vec();

        self.cache.add(message, &answers);
        Ok(answers)
    }

    /// Rebuild the HTTP client from the stored configuration and swap it in.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let fresh = build_http_client(self.verify, self.proxy.as_deref())?;
        self.http.store(Arc::new(fresh));
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::Release);
        self.cache.shutdown();
        Ok(())
    }

    fn classify(&self, error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            ClientError::Timeout {
                server: self.url.to_string(),
            }
        } else {
            ClientError::Http {
                url: self.url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl DnsClient for DohClient {
    async fn query(&self, message: &Message, timeout: Duration) -> QueryOutcome {
        DohClient::query(self, message, timeout).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        DohClient::close(self).await
    }
}

fn build_http_client(
    verify: VerifyPolicy,
    proxy: Option<&str>,
) -> Result<reqwest::Client, ClientError> {
    // Shares the proxy validation path with the classic transport, so a bad
    // scheme is rejected before reqwest sees it.
    let _ = ProxyDialer::resolve(proxy)?;

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .http2_prior_knowledge()
        .pool_max_idle_per_host(4);

    if let Some(uri) = proxy.filter(|uri| !uri.is_empty()) {
        let relay = reqwest::Proxy::all(uri)
            .map_err(|e| ClientError::Config(format!("proxy '{uri}': {e}")))?;
        builder = builder.proxy(relay);
    }

    if verify == VerifyPolicy::SkipVerify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| ClientError::Config(format!("building HTTP client: {e}")))
}
