//! # Line framing for envelopes.
//!
//! One envelope per line of JSON (`LinesCodec` with a length cap). Outbound
//! traffic goes through a single writer task per channel end, so per-direction
//! ordering is the order in which envelopes were queued.

use futures::SinkExt;
use tokio::{io::AsyncRead, io::AsyncWrite, sync::mpsc, task::JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::envelope::Envelope;
use super::wire_error::ProtocolError;

/// Upper bound for a single encoded envelope.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Wraps the inbound half of a channel.
pub(crate) fn frame_reader<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
}

/// Parses one received line.
pub(crate) fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(line).map_err(ProtocolError::Envelope)
}

/// Spawns the writer task for the outbound half of a channel.
///
/// The task ends when every sender is dropped, when the pipe breaks, or when
/// `stop` is cancelled. On `stop` it still writes every envelope already
/// queued, then closes the sink.
pub(crate) fn spawn_writer<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    tokio::spawn(async move {
        loop {
            let env = tokio::select! {
                biased;
                env = rx.recv() => match env {
                    Some(env) => env,
                    None => break,
                },
                _ = stop.cancelled() => {
                    rx.close();
                    break;
                }
            };
            if !write_envelope(&mut sink, &env).await {
                return;
            }
        }
        while let Ok(env) = rx.try_recv() {
            if !write_envelope(&mut sink, &env).await {
                return;
            }
        }
        let _ = SinkExt::<String>::close(&mut sink).await;
    })
}

/// Writes one line. Returns `false` once the pipe is gone.
async fn write_envelope<W>(sink: &mut FramedWrite<W, LinesCodec>, env: &Envelope) -> bool
where
    W: AsyncWrite + Unpin,
{
    let line = match serde_json::to_string(env) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(kind = env.kind.as_str(), error = %e, "dropping unencodable envelope");
            return true;
        }
    };
    match sink.send(line).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "channel writer closed");
            false
        }
    }
}
