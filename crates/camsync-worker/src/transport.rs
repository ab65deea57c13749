//! NDJSON transport between stdio and a running synchronizer.
//!
//! Input lines are decoded into [`InboundMessage`]s and dispatched to a
//! [`SyncHandle`]. Lines are read as raw bytes and never buffered past the
//! configured limit. Synchronizer events are funneled through an unbounded
//! channel to a single writer task so handler calls never block on IO.

use camsync_core::{BoxError, FrameSynchronizer, SyncHandle};
use camsync_models::{InboundMessage, OutboundEvent};
use metrics::counter;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

/// Counters for one pass over the input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub lines: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Decode one input line. Blank lines yield `None`.
///
/// Invalid UTF-8 is reported as a decode error like any other bad JSON.
pub fn decode_line(line: &[u8], max_line_bytes: usize) -> WorkerResult<Option<InboundMessage>> {
    if line.len() > max_line_bytes {
        return Err(WorkerError::LineTooLong {
            len: line.len(),
            max: max_line_bytes,
        });
    }
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(line)?))
}

/// Read the next line into `line`, without its newline.
///
/// Returns the full length of the line, or `None` at end of input. Bytes
/// past `max_line_bytes` are consumed but not kept; `line` is left empty
/// for such a line.
async fn read_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_line_bytes: usize,
) -> std::io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut len = 0usize;
    loop {
        let (used, complete) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok((len > 0).then_some(len));
            }
            let (take, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos, true),
                None => (available.len(), false),
            };
            len = len.saturating_add(take);
            if len <= max_line_bytes {
                line.extend_from_slice(&available[..take]);
            } else {
                line.clear();
            }
            (take + usize::from(complete), complete)
        };
        reader.consume(used);
        if complete {
            return Ok(Some(len));
        }
    }
}

/// Encode one event as a single JSON line, without the trailing newline.
pub fn encode_event(event: &OutboundEvent) -> WorkerResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Forward every synchronizer event into `sink`.
pub fn attach_event_sink(engine: &mut FrameSynchronizer, sink: mpsc::UnboundedSender<OutboundEvent>) {
    let composite_sink = sink.clone();
    engine.on_composite_frame(move |frame| {
        composite_sink
            .send(OutboundEvent::CompositeFrame(frame.clone()))
            .map_err(|_| BoxError::from("event sink closed"))
    });

    let focus_sink = sink.clone();
    engine.on_focus_changed(move |focus| {
        focus_sink
            .send(OutboundEvent::focus_changed(focus.cloned()))
            .map_err(|_| BoxError::from("event sink closed"))
    });

    engine.on_sync_error(move |err| {
        let _ = sink.send(OutboundEvent::sync_error(err.to_string()));
    });
}

/// Read NDJSON commands until EOF and dispatch them to the runtime.
///
/// Undecodable and oversized lines are reported on `errors` and skipped.
/// Returns early only on IO failure or when the runtime has stopped.
pub async fn read_commands<R>(
    mut reader: R,
    handle: &SyncHandle,
    errors: &mpsc::UnboundedSender<OutboundEvent>,
    max_line_bytes: usize,
) -> WorkerResult<ReadSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ReadSummary::default();
    let mut line = Vec::new();

    while let Some(len) = read_line(&mut reader, &mut line, max_line_bytes).await? {
        summary.lines += 1;
        let decoded = if len > max_line_bytes {
            Err(WorkerError::LineTooLong {
                len,
                max: max_line_bytes,
            })
        } else {
            decode_line(&line, max_line_bytes)
        };
        match decoded {
            Ok(Some(message)) => {
                handle.dispatch(message)?;
                summary.accepted += 1;
            }
            Ok(None) => {}
            Err(e) if e.is_recoverable() => {
                warn!(line = summary.lines, "Rejected input line: {}", e);
                summary.rejected += 1;
                counter!("camsync_input_rejected_total").increment(1);
                let _ = errors.send(OutboundEvent::sync_error(format!(
                    "line {}: {}",
                    summary.lines, e
                )));
            }
            Err(e) => return Err(e),
        }
    }

    debug!(?summary, "Input stream closed");
    Ok(summary)
}

/// Write events as NDJSON until every sender is dropped.
///
/// Returns the number of events written.
pub async fn write_events<W>(
    mut events: mpsc::UnboundedReceiver<OutboundEvent>,
    mut writer: W,
) -> WorkerResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(event) = events.recv().await {
        let mut line = encode_event(&event)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
