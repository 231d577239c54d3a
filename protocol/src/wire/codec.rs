//! # Message Framing
//!
//! Every typed message on the wire is one frame: a 4-byte big-endian
//! length followed by the bincode encoding of a serde record. Frames are
//! capped at [`MAX_FRAME_BYTES`](crate::config::MAX_FRAME_BYTES) and every
//! read and write carries the session deadline, so a stalled or hostile
//! peer cannot pin a handler.
//!
//! bincode is pinned as the codec: field order is fixed by the record
//! definitions in this crate, and big integers serialize as their
//! little-endian digit vectors. Changing either is a wire-format break.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{IO_TIMEOUT, MAX_FRAME_BYTES};
use crate::error::{CashError, Result};

/// Awaits an I/O future under the session deadline.
pub(crate) async fn timed<T>(
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(IO_TIMEOUT, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CashError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "session i/o deadline exceeded",
        ))),
    }
}

/// Writes one framed message.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_BYTES as usize {
        return Err(CashError::WireDecode(format!(
            "outgoing frame of {} bytes exceeds cap",
            payload.len()
        )));
    }
    let len = (payload.len() as u32).to_be_bytes();
    timed(writer.write_all(&len)).await?;
    timed(writer.write_all(&payload)).await?;
    timed(writer.flush()).await?;
    Ok(())
}

/// Reads one framed message.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    timed(reader.read_exact(&mut len_bytes)).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(CashError::WireDecode(format!(
            "incoming frame of {len} bytes exceeds cap"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    timed(reader.read_exact(&mut payload)).await?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let value = BigUint::from(0xDEAD_BEEF_u64).pow(19);
        write_frame(&mut a, &value).await.unwrap();
        let back: BigUint = read_frame(&mut b).await.unwrap();
        assert_eq!(value, back);
    }

    #[tokio::test]
    async fn frames_preserve_order() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        for i in 0..5u32 {
            write_frame(&mut a, &i).await.unwrap();
        }
        for i in 0..5u32 {
            let got: u32 = read_frame(&mut b).await.unwrap();
            assert_eq!(got, i);
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocation() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        // Hand-craft a frame header claiming 64 MiB.
        let len = (64u32 * 1024 * 1024).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();
        let result: Result<Vec<u8>> = read_frame(&mut b).await;
        assert!(matches!(result, Err(CashError::WireDecode(_))));
    }

    #[tokio::test]
    async fn truncated_stream_is_an_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        tokio::io::AsyncWriteExt::write_all(&mut a, &8u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, &[1, 2, 3]).await.unwrap();
        drop(a);
        let result: Result<u64> = read_frame(&mut b).await;
        assert!(matches!(result, Err(CashError::Io(_))));
    }
}
