//! TCP framing.
//!
//! ```text
//! connection := preamble frame*
//! preamble   := "VX0S" responder_spi:u64be
//! frame      := len:u32be sealed_frame[len]
//! ```
//!
//! The preamble is the only cleartext on the connection; it tells the
//! responder which completed handshake the connection belongs to.

use crate::domain::MAX_MESSAGE;
use crate::error::{SessionError, SessionResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use vx_02_secure_channel::{SealedFrame, FRAME_HEADER_LEN};

const PREAMBLE_MAGIC: &[u8; 4] = b"VX0S";

/// Largest sealed frame: a full message plus header and AEAD tag.
pub const MAX_FRAME: usize = MAX_MESSAGE + FRAME_HEADER_LEN + 16;

pub async fn write_preamble<W: AsyncWrite + Unpin>(writer: &mut W, spi: u64) -> SessionResult<()> {
    let mut buf = [0u8; 12];
    buf[..4].copy_from_slice(PREAMBLE_MAGIC);
    buf[4..].copy_from_slice(&spi.to_be_bytes());
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_preamble<R: AsyncRead + Unpin>(reader: &mut R) -> SessionResult<u64> {
    let mut buf = [0u8; 12];
    reader.read_exact(&mut buf).await?;
    if &buf[..4] != PREAMBLE_MAGIC {
        return Err(SessionError::protocol("bad connection preamble"));
    }
    let mut spi = [0u8; 8];
    spi.copy_from_slice(&buf[4..]);
    Ok(u64::from_be_bytes(spi))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &SealedFrame,
) -> SessionResult<()> {
    let bytes = frame.encode();
    if bytes.len() > MAX_FRAME {
        return Err(SessionError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME,
        });
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// [`write_frame`] that gives up after `limit`. A write still pending that
/// long means the peer stopped reading; the connection is unusable after a
/// timeout.
pub async fn write_frame_within<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &SealedFrame,
    limit: Duration,
) -> SessionResult<()> {
    tokio::time::timeout(limit, write_frame(writer, frame))
        .await
        .map_err(|_| SessionError::Timeout {
            stage: "frame write",
        })?
}

/// Read one frame; `None` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> SessionResult<Option<SealedFrame>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(SessionError::FrameTooLarge {
            len,
            max: MAX_FRAME,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(SealedFrame::decode(&buf)?))
}

/// Move frame reads into their own task so the session loop can select on
/// a channel; `read_exact` is not cancellation safe.
pub fn spawn_reader(
    mut reader: OwnedReadHalf,
) -> (mpsc::Receiver<SessionResult<SealedFrame>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        loop {
            let result = read_frame(&mut reader).await;
            let stop = !matches!(result, Ok(Some(_)));
            let item = match result {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => Err(SessionError::PeerClosed),
                Err(e) => Err(e),
            };
            if tx.send(item).await.is_err() || stop {
                break;
            }
        }
        debug!("[vx-06] Frame reader finished");
    });
    (rx, handle)
}
