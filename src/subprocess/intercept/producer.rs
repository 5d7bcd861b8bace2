//! Stream producer: child stream to relay queue

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::error::InterceptError;
use super::queue::RelayQueue;
use super::types::{RelayEntry, StreamSource};

/// Read `stream` to EOF, enqueuing every chunk as a line.
///
/// Each line keeps its terminator; trimming is the consumer's job. EOF ends
/// the producer without enqueuing a sentinel. A read failure is forwarded to
/// the consumer as an error entry. Returns the number of lines enqueued.
pub async fn produce<R>(stream: R, source: StreamSource, queue: RelayQueue) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut produced = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("{} reached end of stream after {} lines", source, produced);
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if let Err(e) = queue.enqueue(RelayEntry::Line(line)) {
                    tracing::debug!("{} producer stopping: {}", source, e);
                    break;
                }
                produced += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", source, e);
                let entry = RelayEntry::Error(InterceptError::Read {
                    source_stream: source,
                    source: e,
                });
                if let Err(e) = queue.enqueue(entry) {
                    tracing::debug!("{} read error not forwarded: {}", source, e);
                }
                break;
            }
        }
        tokio::task::yield_now().await;
    }

    produced
}
