//! Wire codec boundary.
//!
//! DNS messages cross this crate as `hickory_proto` structures; the binary
//! pack/unpack work is delegated here so transports never touch encoders
//! directly.

use crate::error::ClientError;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};

/// Serialize a message to wire format.
pub fn pack(message: &Message) -> Result<Vec<u8>, ClientError> {
    let mut wire = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut wire);

    message
        .emit(&mut encoder)
        .map_err(|e| ClientError::Encode(e.to_string()))?;

    Ok(wire)
}

/// Parse a wire-format response received from `server`.
pub fn unpack(wire: &[u8], server: &str) -> Result<Message, ClientError> {
    Message::from_vec(wire).map_err(|e| ClientError::Decode {
        server: server.to_string(),
        reason: e.to_string(),
    })
}
