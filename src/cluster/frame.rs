//! Length-prefixed framing for the cluster wire protocol.
//!
//! One frame is a 2-byte little-endian length followed by that many payload
//! bytes. Readers loop until the full length has arrived rather than
//! assuming one `read` call returns the whole frame.
//!
//! spec.md §4.1 notes the original source (`original_source/cluster/client.go`)
//! wrote a 4-byte length buffer — `b := make([]byte, 4)` — but only ever
//! filled the low 16 bits via `binary.LittleEndian.PutUint16(b[0:], ...)`
//! before writing it in two separate `conn.Write` calls. We keep the 2-byte
//! semantics and simply don't allocate the unused upper two bytes — there is
//! nothing to be "reserved" about bytes that are never written.

use crate::error::{DbError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Caps a single frame's payload at what a `u16` length prefix can address.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(DbError::Framing(format!(
            "payload of {} bytes exceeds max frame size {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    let len = payload.len() as u16;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf).await.map_err(|e| DbError::Framing(e.to_string()))?;
    let len = u16::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(|e| DbError::Framing(e.to_string()))?;
    Ok(payload)
}
