//! Minimal async DNS client library with native support for
//!
//! - DNS over UDP
//! - DNS over TCP
//! - DNS over TLS (DoT, RFC 7858)
//! - DNS over HTTPS (DoH, RFC 8484)
//! - DNS over QUIC (DoQ, RFC 9250)
//!
//! behind one uniform [`DnsClient`] contract, optionally through a SOCKS5
//! proxy, with per-query deadlines and a short-lived response cache on the
//! tunneled transports.
//!
//! ```no_run
//! use polydns::proto::op::{Message, MessageType, OpCode, Query};
//! use polydns::proto::rr::{DNSClass, Name, RecordType};
//! use polydns::{Client, VerifyPolicy};
//! use std::str::FromStr;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), polydns::ClientError> {
//! let mut query = Query::new();
//! query.set_name(Name::from_str("example.com.").unwrap());
//! query.set_query_type(RecordType::A);
//! query.set_query_class(DNSClass::IN);
//!
//! let mut message = Message::new(0x2e1f, MessageType::Query, OpCode::Query);
//! message.set_recursion_desired(true);
//! message.add_query(query);
//!
//! let client = Client::from_uri("udp://1.1.1.1:53", VerifyPolicy::Enforce, None).await?;
//! let outcome = client.query(&message, Duration::from_secs(5)).await;
//! println!("answers: {:?}, elapsed: {:?}", outcome.result, outcome.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod error;
pub mod proxy;
pub mod tls;
pub mod transport;

/// Re-export of the DNS message codec this crate speaks at its boundary.
pub use hickory_proto as proto;

pub use cache::{fingerprint, Fingerprint, MessageCache};
pub use client::{Client, DnsClient, QueryOutcome};
pub use error::ClientError;
pub use proxy::ProxyDialer;
pub use tls::VerifyPolicy;
pub use transport::classic::{ClassicClient, ClassicConfig};
pub use transport::doh::DohClient;
pub use transport::doq::DoqClient;
