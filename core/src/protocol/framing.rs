// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Length-prefixed message framing.
//!
//! Each frame is a u32 big-endian byte count followed by the JSON encoding
//! of one [`Message`]. One frame per direction per connection is all the
//! protocol ever needs, so there is no streaming state to manage.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::message::Message;

/// Upper bound on an accepted frame. A batch of a few thousand points in a
/// few thousand dimensions stays well under this.
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Errors on the framed transport.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unrepresentable message payload.
    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A peer announced a frame larger than [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge {
        /// Announced frame length.
        len: usize,
    },
}

/// Write one framed message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}
