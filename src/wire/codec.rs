//! Frame Codec
//!
//! Every message on the wire is a frame: a 4-byte big-endian payload length
//! followed by the payload. The encode/decode helpers are pure (Sans-IO); the
//! async helpers wrap them around any `AsyncRead`/`AsyncWrite`.

use crate::error::{ProtocolError, Result, UplinkError};
use crate::wire::messages::DataRequest;
use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted from a peer.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size.
pub const LENGTH_PREFIX: usize = 4;

/// Read size used when streaming a file into a `Data` frame.
pub const FILE_CHUNK_SIZE: usize = 8 * 1024;

// ==================== Sans-IO Functions ====================

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a length from the first 4 bytes.
pub fn decode_length(buf: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*buf)
}

/// Validate a declared length against the inbound limit.
pub fn check_length(length: usize) -> std::result::Result<(), ProtocolError> {
    if length == 0 {
        return Err(ProtocolError::ZeroLengthFrame);
    }
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            length,
            limit: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Split a complete frame into its payload.
///
/// The declared length must match the bytes that follow exactly.
pub fn decode_frame(frame: &[u8]) -> std::result::Result<&[u8], ProtocolError> {
    if frame.len() < LENGTH_PREFIX {
        return Err(ProtocolError::Truncated {
            field: "frame.length",
            needed: LENGTH_PREFIX,
            remaining: frame.len(),
        });
    }

    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&frame[..LENGTH_PREFIX]);
    let declared = decode_length(&prefix) as usize;
    check_length(declared)?;

    let payload = &frame[LENGTH_PREFIX..];
    if payload.len() != declared {
        return Err(ProtocolError::FrameLengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

// ==================== Async I/O ====================

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and return its payload.
///
/// A short read surfaces as a transport error; a bad length as a protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = decode_length(&len_buf) as usize;
    check_length(len)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

/// Write a `Data` frame whose payload bytes come from the file at `path`.
///
/// The file is streamed in fixed-size chunks so it is never held in memory.
/// Returns the number of data bytes sent.
pub async fn write_data_request<W>(writer: &mut W, request: &DataRequest, path: &Path) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UplinkError::source_file(path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| UplinkError::source_file(path, e))?
        .len();

    let frame_len = DataRequest::HEADER_LEN as u64 + size;
    if frame_len > u64::from(u32::MAX) {
        return Err(ProtocolError::FrameTooLarge {
            length: frame_len as usize,
            limit: u32::MAX as usize,
        }
        .into());
    }

    let mut head = BytesMut::with_capacity(LENGTH_PREFIX + DataRequest::HEADER_LEN);
    head.put_u32(frame_len as u32);
    head.put_slice(&request.encode_header(size as u32));
    writer.write_all(&head).await?;

    let mut source = file.take(size);
    let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = source
            .read(&mut chunk)
            .await
            .map_err(|e| UplinkError::source_file(path, e))?;
        if n == 0 {
            break;
        }
        writer.write_all(&chunk[..n]).await?;
        sent += n as u64;
    }

    if sent != size {
        return Err(UplinkError::source_file(
            path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file shrank during upload: expected {} bytes, read {}", size, sent),
            ),
        ));
    }

    writer.flush().await?;
    tracing::debug!("streamed {} bytes from {}", sent, path.display());
    Ok(sent)
}
