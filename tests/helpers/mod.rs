#![allow(dead_code)]

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;

/// Wire up log output for the test run; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// How a mock server answers queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockBehavior {
    /// Echo the question with one A answer record.
    Answer,
    /// Answer with the TC bit set.
    Truncated,
    /// Answer with a flipped transaction id.
    WrongId,
    /// Never respond.
    Silent,
    /// TCP only: close the first connection right after reading the query;
    /// answer normally on later connections.
    CloseFirstConnection,
}

/// The address every mock `Answer` resolves to.
pub const MOCK_ANSWER_IP: [u8; 4] = [192, 0, 2, 53];

pub fn build_query(name: &str, id: u16) -> Message {
    let mut query = Query::new();
    query.set_name(Name::from_str(name).unwrap());
    query.set_query_type(RecordType::A);
    query.set_query_class(DNSClass::IN);

    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query);
    message
}

/// Raw-bytes mock response: echo the id and question, append one A record.
fn build_mock_response(query: &[u8], behavior: MockBehavior) -> Vec<u8> {
    if query.len() < 12 {
        return vec![];
    }

    let mut response = Vec::with_capacity(512);

    match behavior {
        MockBehavior::WrongId => {
            response.push(query[0] ^ 0xff);
            response.push(query[1] ^ 0xff);
        }
        _ => response.extend_from_slice(&query[0..2]),
    }

    // QR + RD, RA; TC when truncating.
    match behavior {
        MockBehavior::Truncated => response.push(0x83),
        _ => response.push(0x81),
    }
    response.push(0x80);

    // QDCOUNT copied, ANCOUNT = 1, NSCOUNT = ARCOUNT = 0.
    response.extend_from_slice(&query[4..6]);
    response.extend_from_slice(&[0x00, 0x01]);
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&[0x00, 0x00]);

    if query.len() > 12 {
        response.extend_from_slice(&query[12..]);
    }

    response.extend_from_slice(&[
        0xc0, 0x0c, // name pointer to the question
        0x00, 0x01, // TYPE A
        0x00, 0x01, // CLASS IN
        0x00, 0x00, 0x00, 0x3c, // TTL 60
        0x00, 0x04, // RDLENGTH
        MOCK_ANSWER_IP[0],
        MOCK_ANSWER_IP[1],
        MOCK_ANSWER_IP[2],
        MOCK_ANSWER_IP[3],
    ]);

    response
}

pub struct MockUdpServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUdpServer {
    pub async fn start(behavior: MockBehavior) -> std::io::Result<(Self, SocketAddr)> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let local_addr = socket.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, peer)) = result else { break };
                        if behavior == MockBehavior::Silent {
                            continue;
                        }
                        let response = build_mock_response(&buf[..len], behavior);
                        let _ = socket.send_to(&response, peer).await;
                    }
                }
            }
        });

        Ok((
            Self {
                addr: local_addr,
                shutdown_tx: Some(shutdown_tx),
            },
            local_addr,
        ))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MockUdpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct MockTcpServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockTcpServer {
    pub async fn start(behavior: MockBehavior) -> std::io::Result<(Self, SocketAddr)> {
        Self::start_at("127.0.0.1:0".parse().unwrap(), behavior).await
    }

    /// Bind to a specific address, e.g. to revive a server on a port a
    /// client is still configured for.
    pub async fn start_at(
        bind: SocketAddr,
        behavior: MockBehavior,
    ) -> std::io::Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut connections: u32 = 0;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((mut stream, _)) = accepted else { break };
                        connections += 1;
                        let close_after_read =
                            behavior == MockBehavior::CloseFirstConnection && connections == 1;

                        tokio::spawn(async move {
                            loop {
                                let mut length_bytes = [0u8; 2];
                                if stream.read_exact(&mut length_bytes).await.is_err() {
                                    return;
                                }
                                let length = u16::from_be_bytes(length_bytes) as usize;
                                let mut query = vec![0u8; length];
                                if stream.read_exact(&mut query).await.is_err() {
                                    return;
                                }

                                if close_after_read {
                                    // Drop the stream: the client sees EOF.
                                    return;
                                }
                                if behavior == MockBehavior::Silent {
                                    continue;
                                }

                                let response = build_mock_response(&query, behavior);
                                let framed_len = (response.len() as u16).to_be_bytes();
                                if stream.write_all(&framed_len).await.is_err() {
                                    return;
                                }
                                if stream.write_all(&response).await.is_err() {
                                    return;
                                }
                                let _ = stream.flush().await;
                            }
                        });
                    }
                }
            }
        });

        Ok((
            Self {
                addr: local_addr,
                shutdown_tx: Some(shutdown_tx),
            },
            local_addr,
        ))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MockTcpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
