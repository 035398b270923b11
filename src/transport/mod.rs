//! Transport implementations and shared plumbing.
//!
//! Each variant owns its connection (or session) exclusively and exposes the
//! uniform query/close contract from [`crate::client`]. The caller-supplied
//! timeout becomes a hard [`Deadline`] applied to every blocking await, so an
//! expired timeout unblocks the I/O itself instead of abandoning a racing
//! task.

pub mod classic;
pub mod doh;
pub mod doq;

use crate::error::ClientError;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Absolute point in time by which a query must complete. Each await gets
/// the remaining budget, so sequential I/O steps share one deadline.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    end: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            end: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    /// Run `operation` within the remaining budget; an elapsed deadline maps
    /// to [`ClientError::Timeout`] against `server`.
    pub async fn run<F>(&self, server: &str, operation: F) -> Result<F::Output, ClientError>
    where
        F: Future,
    {
        tokio::time::timeout(self.remaining(), operation)
            .await
            .map_err(|_| ClientError::Timeout {
                server: server.to_string(),
            })
    }
}

/// Write one DNS message with the two-byte big-endian length prefix used by
/// TCP and DoT (RFC 1035 §4.2.2).
pub(crate) async fn write_framed<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    let length = message.len() as u16;
    stream.write_all(&length.to_be_bytes()).await?;
    stream.write_all(message).await?;
    stream.flush().await
}

/// Read one length-prefixed DNS message. A peer close surfaces as
/// `UnexpectedEof`, which the classic transport treats as connection loss.
pub(crate) async fn read_framed<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncReadExt + Unpin,
{
    let mut length_bytes = [0u8; 2];
    stream.read_exact(&mut length_bytes).await?;

    // A u16 prefix keeps the allocation within the 65535-byte DNS limit.
    let length = u16::from_be_bytes(length_bytes) as usize;
    let mut message = vec![0u8; length];
    stream.read_exact(&mut message).await?;
    Ok(message)
}
