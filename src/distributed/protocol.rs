//! Wire protocol between transport endpoints
//!
//! Every frame is a MessagePack (rmp-serde) record prefixed with a 4-byte
//! length field (little-endian u32). Bulk payloads follow their header frame
//! as raw bytes, so array data is never re-encoded.
//!
//! # Connection Flow
//!
//! ```text
//! Connecting endpoint             Accepting endpoint
//!     |                              |
//!     |-------- HELLO(address) ----->|   once per connection
//!     |                              |
//!     |-- HEADER(mailbox, len) ----->|
//!     |-- len raw payload bytes ---->|
//!     |            ...               |
//! ```
//!
//! The HELLO frame carries the connecting endpoint's published listening
//! address, which cannot be recovered from the accepted socket (its source
//! port is ephemeral). Either side may then send on the connection.
//!
//! # Message Framing
//!
//! ```text
//! [4 bytes: header length][N bytes: rmp FrameHeader][payload_len bytes: payload]
//! ```
//!
//! # Payload Formats
//!
//! Payloads are opaque to the transport. The exchange driver puts two kinds
//! on its mailboxes: [`MetadataMessage`] records on the metadata mailbox, and
//! data blocks (a framed [`BlockHeader`] followed by the packed region) on the
//! data mailbox.

use crate::distributed::address::EndpointAddress;
use crate::distributed::coordinator::Role;
use crate::distribution::DistributionDescriptor;
use crate::error::{RedistError, Result};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Both ends of a connection must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default mailbox for metadata records
pub const METADATA_MAILBOX: u32 = 0;

/// Default mailbox for data blocks
pub const DATA_MAILBOX: u32 = 1;

/// Upper bound for any framed record (headers, HELLO, metadata)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Handshake sent once by the connecting side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u32,

    /// Published listening address of the connecting endpoint
    pub address: EndpointAddress,
}

/// Per-message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub sender_host: String,
    pub sender_port: u16,
    pub mailbox: u32,
    pub payload_len: u64,

    /// Sender handed the buffer over (true) or shared a view of it (false)
    pub owned: bool,
}

impl FrameHeader {
    pub fn sender(&self) -> EndpointAddress {
        EndpointAddress::new(self.sender_host.clone(), self.sender_port)
    }
}

/// Metadata records exchanged during the metadata phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataMessage {
    /// A participant announces (or re-announces) its descriptor
    Advertise {
        exchange: String,
        role: Role,
        descriptor: DistributionDescriptor,
    },

    /// A participant leaves the exchange
    Withdraw {
        exchange: String,
        role: Role,
        rank: u32,
    },
}

impl MetadataMessage {
    pub fn exchange(&self) -> &str {
        match self {
            MetadataMessage::Advertise { exchange, .. } => exchange,
            MetadataMessage::Withdraw { exchange, .. } => exchange,
        }
    }
}

/// Prefix of every data block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub exchange: String,
    pub provider_rank: u32,
    pub round: u64,
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Serialize a record with its length prefix
pub fn serialize_frame<T: Serialize>(record: &T) -> io::Result<Vec<u8>> {
    let body = rmp_serde::to_vec(record).map_err(|e| invalid_data(format!("Failed to serialize frame: {}", e)))?;

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);

    Ok(framed)
}

/// Deserialize a length-prefixed record from the front of `buf`
///
/// Returns the record and the number of bytes consumed, including the prefix.
pub fn deserialize_frame<T: DeserializeOwned>(buf: &[u8]) -> io::Result<(T, usize)> {
    if buf.len() < 4 {
        return Err(invalid_data(format!(
            "Buffer too small for frame length (need 4 bytes, got {})",
            buf.len()
        )));
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Err(invalid_data(format!(
            "Incomplete frame (need {} bytes, got {})",
            4 + len,
            buf.len()
        )));
    }

    let record = rmp_serde::from_slice(&buf[4..4 + len])
        .map_err(|e| invalid_data(format!("Failed to deserialize frame: {}", e)))?;

    Ok((record, 4 + len))
}

/// Read one length-prefixed record
///
/// Returns `Ok(None)` if the stream ends cleanly before the first byte of the
/// frame, which is how a peer closing its side shows up.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[first..]).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(invalid_data(format!("Frame too large: {} bytes (max {})", len, MAX_FRAME_LEN)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let record = rmp_serde::from_slice(&body)
        .map_err(|e| invalid_data(format!("Failed to deserialize frame: {}", e)))?;

    Ok(Some(record))
}

/// Write one length-prefixed record
pub async fn write_frame<W, T>(writer: &mut W, record: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let framed = serialize_frame(record)?;
    writer.write_all(&framed).await?;
    writer.flush().await
}

/// Read a header frame and exactly `payload_len` payload bytes
pub async fn read_message<R>(reader: &mut R, max_payload: u64) -> io::Result<Option<(FrameHeader, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let Some(header) = read_frame::<_, FrameHeader>(reader).await? else {
        return Ok(None);
    };

    if header.payload_len > max_payload {
        return Err(invalid_data(format!(
            "Payload too large: {} bytes (max {})",
            header.payload_len, max_payload
        )));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some((header, Bytes::from(payload))))
}

/// Write a header frame followed by the raw payload
pub async fn write_message<W>(writer: &mut W, header: &FrameHeader, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_frame(header)?;
    writer.write_all(&framed).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Encode a metadata record as a mailbox payload
pub fn encode_metadata(msg: &MetadataMessage) -> Result<Vec<u8>> {
    rmp_serde::to_vec(msg).map_err(|e| RedistError::Protocol(format!("Failed to encode metadata: {}", e)))
}

/// Decode a metadata record from a mailbox payload
pub fn decode_metadata(payload: &[u8]) -> Result<MetadataMessage> {
    rmp_serde::from_slice(payload).map_err(|e| RedistError::Protocol(format!("Failed to decode metadata: {}", e)))
}

/// Encode a data block: framed header, then the packed region
pub fn encode_block(header: &BlockHeader, data: &[u8]) -> Result<Vec<u8>> {
    let mut block = serialize_frame(header).map_err(|e| RedistError::Protocol(e.to_string()))?;
    block.extend_from_slice(data);
    Ok(block)
}

/// Decode a data block without copying the packed region
pub fn decode_block(payload: Bytes) -> Result<(BlockHeader, Bytes)> {
    let (header, consumed) =
        deserialize_frame::<BlockHeader>(&payload).map_err(|e| RedistError::Protocol(e.to_string()))?;
    Ok((header, payload.slice(consumed..)))
}
