//! Stream consumer: relay queue to registered sinks

use futures::StreamExt;

use super::error::InterceptError;
use super::queue::RelayReceiver;
use super::sink::SinkRegistry;
use super::types::StreamSource;

/// Dispatch every line of `receiver` to the sinks of `source`.
///
/// Sinks run in registration order with the line trimmed of surrounding
/// whitespace. The first sink failure or error entry ends the consumer.
/// Returns the number of lines delivered.
pub async fn consume(
    receiver: RelayReceiver,
    source: StreamSource,
    sinks: SinkRegistry,
) -> Result<usize, InterceptError> {
    let lines = receiver.into_stream();
    tokio::pin!(lines);
    let mut delivered = 0;

    while let Some(item) = lines.next().await {
        let line = item?;
        let line = line.trim();

        tracing::trace!("{}: {}", source, line);
        for sink in sinks.snapshot(source) {
            sink.on_line(line).map_err(|e| InterceptError::Sink {
                source_stream: source,
                source: e,
            })?;
        }
        delivered += 1;
        tokio::task::yield_now().await;
    }

    tracing::debug!("{} consumer finished after {} lines", source, delivered);
    Ok(delivered)
}
