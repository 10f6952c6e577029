//! Streaming relay between the caller and the upstream
//!
//! Each direction of a proxied request is a pump: a task that reads one frame
//! from a source body and forwards it into a bounded channel, which the other
//! connection reads as a [`ChannelBody`]. Memory per direction is bounded by
//! [`RELAY_WINDOW`] frames whatever the size of the body.
//!
//! Every proxied request owns one `CancellationToken`. It is cancelled when
//! the caller goes away (the response body or the pending forward future is
//! dropped), which stops both pumps and the upstream connection task.

use crate::error::{BoxError, RelayError};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

/// Frames buffered per direction
pub const RELAY_WINDOW: usize = 8;

type FrameResult = Result<Frame<Bytes>, RelayError>;

/// Progress of a proxied request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No response has been sent to the caller yet
    Idle,
    /// Upstream status and headers were handed to the caller
    HeadersSent,
    /// Body frames are flowing
    Streaming,
    Complete,
    /// Failed or cancelled after headers were sent; the caller connection is
    /// cut instead of receiving an error response
    Aborted,
}

/// How a pump finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Source reached end of stream and every frame was handed over
    Complete { bytes: u64 },
    /// The token was cancelled
    Cancelled { bytes: u64 },
    /// The receiving side went away
    SinkClosed { bytes: u64 },
    /// The source body failed; the error was forwarded to the sink
    Failed { bytes: u64, error: String },
}

impl PumpOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Complete { bytes }
            | Self::Cancelled { bytes }
            | Self::SinkClosed { bytes }
            | Self::Failed { bytes, .. } => *bytes,
        }
    }

    /// Terminal relay state for this outcome
    pub fn state(&self) -> RelayState {
        match self {
            Self::Complete { .. } => RelayState::Complete,
            _ => RelayState::Aborted,
        }
    }
}

/// Create a channel pair for one relay direction
pub fn channel() -> (mpsc::Sender<FrameResult>, mpsc::Receiver<FrameResult>) {
    mpsc::channel(RELAY_WINDOW)
}

/// Copy frames from `source` into `sink` until the source ends, fails, the
/// sink is dropped or `cancel` fires.
///
/// Frames are forwarded one at a time in arrival order. A source error is
/// forwarded to the sink so the reading side fails too.
pub async fn pump<B>(
    mut source: B,
    sink: mpsc::Sender<FrameResult>,
    cancel: CancellationToken,
    direction: &'static str,
) -> PumpOutcome
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    let mut bytes = 0u64;
    let mut state = RelayState::Idle;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return PumpOutcome::Cancelled { bytes },
            next = source.frame() => next,
        };

        let item = match next {
            None => {
                trace!(direction, bytes, "Relay source finished");
                return PumpOutcome::Complete { bytes };
            }
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    bytes += data.len() as u64;
                }
                if state == RelayState::Idle {
                    state = RelayState::Streaming;
                    trace!(direction, ?state, "First frame received");
                }
                Ok(frame)
            }
            Some(Err(err)) => Err(RelayError::Source(err.into())),
        };

        let failure = item.as_ref().err().map(ToString::to_string);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return PumpOutcome::Cancelled { bytes },
            sent = sink.send(item) => {
                if sent.is_err() {
                    debug!(direction, bytes, "Relay sink closed");
                    return PumpOutcome::SinkClosed { bytes };
                }
            }
        }

        if let Some(error) = failure {
            return PumpOutcome::Failed { bytes, error };
        }
    }
}

/// Body fed by a pump through a bounded channel.
///
/// When built with a drop guard, dropping the body (the caller hung up or the
/// response finished) cancels the request's token.
pub struct ChannelBody {
    rx: Option<mpsc::Receiver<FrameResult>>,
    size_hint: SizeHint,
    _guard: Option<DropGuard>,
}

impl ChannelBody {
    pub fn new(rx: mpsc::Receiver<FrameResult>, size_hint: SizeHint) -> Self {
        Self {
            rx: Some(rx),
            size_hint,
            _guard: None,
        }
    }

    /// A body that is already finished, sent without any body framing
    pub fn empty() -> Self {
        Self {
            rx: None,
            size_hint: SizeHint::with_exact(0),
            _guard: None,
        }
    }

    /// Attach a guard that cancels its token when this body is dropped
    pub fn with_guard(mut self, guard: DropGuard) -> Self {
        self._guard = Some(guard);
        self
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = RelayError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };

        match rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.rx = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        self.size_hint.clone()
    }
}
