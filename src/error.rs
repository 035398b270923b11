use thiserror::Error;

/// Errors surfaced by every client variant.
///
/// Configuration errors (`InvalidUri`, `UnsupportedScheme`, `UnsupportedProxy`,
/// `TlsWithoutStream`, `Config`) are fatal to construction and never retried.
/// Protocol errors (`Truncated`, `IdMismatch`, `KeepaliveOverQuic`,
/// `EmptyResponse`) fail the single query that produced them; the client stays
/// usable afterwards.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client URI '{0}'")]
    InvalidUri(String),

    #[error("unsupported URI scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("only socks5 proxies are supported, got '{0}'")]
    UnsupportedProxy(String),

    #[error("DNS over TLS requires a stream-oriented connection")]
    TlsWithoutStream,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to dial {server}: {reason}")]
    Dial { server: String, reason: String },

    #[error("TLS handshake with {server} failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("timed out waiting for {server}")]
    Timeout { server: String },

    #[error("response {id} was truncated, retry over a stream-oriented transport")]
    Truncated { id: u16 },

    #[error("query id ({query}) and response id ({response}) mismatch")]
    IdMismatch { query: u16, response: u16 },

    #[error("connection to {server} was closed by the peer")]
    ConnectionLost { server: String },

    #[error("reconnect to {server} is in progress")]
    Reconnecting { server: String },

    #[error("client is closed")]
    Closed,

    #[error("EDNS0 TCP keepalive option is not allowed on a QUIC transport")]
    KeepaliveOverQuic,

    #[error("empty response from {server}")]
    EmptyResponse { server: String },

    #[error("failed to encode DNS message: {0}")]
    Encode(String),

    #[error("failed to decode response from {server}: {reason}")]
    Decode { server: String, reason: String },

    #[error("HTTP exchange with {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("I/O error on {server}: {reason}")]
    Io { server: String, reason: String },
}
