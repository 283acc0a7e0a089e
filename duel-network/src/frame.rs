//! Length-prefixed message frames.
//!
//! Each frame is a big-endian `u32` payload length followed by the payload,
//! a bincode encoding of a request or of `Result<response, DuelError>`.

use bytes::{BufMut, Bytes, BytesMut};
use duel_core::{DuelError, DuelResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug)]
pub struct MessageFrame {
    payload: Bytes,
}

impl MessageFrame {
    /// Create a frame, rejecting payloads above `max_size`.
    pub fn new(payload: Bytes, max_size: usize) -> DuelResult<Self> {
        if payload.len() > max_size || u32::try_from(payload.len()).is_err() {
            return Err(DuelError::transport(format!(
                "Message too large: {} bytes",
                payload.len()
            )));
        }
        Ok(Self { payload })
    }

    /// Encode `message` into a frame.
    pub fn encode<T: Serialize>(message: &T, max_size: usize) -> DuelResult<Self> {
        let payload = bincode::serialize(message)
            .map_err(|e| DuelError::transport(format!("Failed to serialize message: {}", e)))?;
        Self::new(Bytes::from(payload), max_size)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> DuelResult<T> {
        bincode::deserialize(&self.payload)
            .map_err(|e| DuelError::transport(format!("Failed to deserialize message: {}", e)))
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> DuelResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.to_bytes())
            .await
            .map_err(|e| DuelError::transport(format!("Failed to write frame: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| DuelError::transport(format!("Failed to flush frame: {}", e)))
    }

    /// Read one frame. A clean end of stream before the length field is `Ok(None)`.
    pub async fn read_from<R>(reader: &mut R, max_size: usize) -> DuelResult<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let length = match reader.read_u32().await {
            Ok(length) => length as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(DuelError::transport(format!(
                    "Failed to read frame length: {}",
                    e
                )))
            }
        };

        if length > max_size {
            return Err(DuelError::transport(format!(
                "Frame too large: {} bytes",
                length
            )));
        }

        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| DuelError::transport(format!("Failed to read frame payload: {}", e)))?;

        Ok(Some(Self {
            payload: Bytes::from(payload),
        }))
    }
}
