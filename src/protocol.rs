//! Wire protocol between the supervisor and a worker process: length-prefixed frames.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes of payload. The
//! payload bytes themselves are produced/consumed by a [`crate::codec::Codec`]; framing never
//! looks inside them.
//!
//! A frame carries a *chunk*: one or more tasks dispatched to the same worker as a single
//! round-trip. `chunksize == 1` (the default) means every chunk holds exactly one task, which is
//! indistinguishable on the wire from the earlier one-task-per-frame protocol.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::task::{CallableId, TaskId};

/// One task within a [`TaskFrame`] chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub task_id: TaskId,
    pub callable_ref: CallableId,
    /// Codec-encoded arguments. Opaque to the framing layer.
    pub args: Vec<u8>,
}

/// Frame written to a worker's stdin: a chunk of one or more tasks executed sequentially by the
/// same worker before a single [`ResultFrame`] is written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFrame {
    /// Identifies the chunk; equal to the `task_id` of `items[0]`.
    pub chunk_id: TaskId,
    pub items: Vec<TaskItem>,
}

/// Outcome tag carried by a [`ResultItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    UserError,
    SerializationError,
}

/// One task's outcome within a [`ResultFrame`] chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    pub task_id: TaskId,
    pub status: Status,
    /// Codec-encoded payload: the return value, the user error's message, or the
    /// serialization-error detail, depending on `status`.
    pub payload: Vec<u8>,
}

/// Frame written to a worker's stdout: one outcome per task in the chunk that was dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFrame {
    pub chunk_id: TaskId,
    pub items: Vec<ResultItem>,
}

/// Maximum single-frame size accepted on either side. Guards against a hostile or corrupt length
/// prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Write one length-prefixed frame. `value` must already be serialized with an outer codec
/// (bincode-free — we reuse `serde_json` for the frame envelope itself, matching the rest of the
/// crate's wire format).
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF before any byte of the
/// length prefix was read (the ordinary "worker died" case). An EOF in the middle of a frame is
/// reported as an `UnexpectedEof` I/O error, since that indicates a worker that died mid-write
/// rather than one that simply closed its pipe between tasks.
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    let value = serde_json::from_slice(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_task_frame() {
        let frame = TaskFrame {
            chunk_id: 42,
            items: vec![TaskItem {
                task_id: 42,
                callable_ref: CallableId::new("identity"),
                args: vec![1, 2, 3],
            }],
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: TaskFrame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded.chunk_id, 42);
        assert_eq!(decoded.items.len(), 1);
        assert_eq!(decoded.items[0].task_id, 42);
        assert_eq!(decoded.items[0].callable_ref, frame.items[0].callable_ref);
        assert_eq!(decoded.items[0].args, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn round_trips_a_multi_item_chunk() {
        let frame = TaskFrame {
            chunk_id: 1,
            items: vec![
                TaskItem {
                    task_id: 1,
                    callable_ref: CallableId::new("identity"),
                    args: vec![1],
                },
                TaskItem {
                    task_id: 2,
                    callable_ref: CallableId::new("identity"),
                    args: vec![2],
                },
            ],
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: TaskFrame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.items[1].task_id, 2);
    }

    #[tokio::test]
    async fn clean_eof_before_any_bytes_reads_as_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame: Option<TaskFrame> = read_frame(&mut cursor).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error_not_a_clean_eof() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            &ResultFrame {
                chunk_id: 1,
                items: vec![ResultItem {
                    task_id: 1,
                    status: Status::Ok,
                    payload: vec![0; 100],
                }],
            },
        )
        .await
        .unwrap();
        buf.truncate(buf.len() - 10);

        let mut cursor = Cursor::new(buf);
        let err = read_frame::<_, ResultFrame>(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
