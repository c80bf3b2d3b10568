//! Streaming iteration events and the keep-alive ticker.
//!
//! A streamed iteration produces `start`, zero or more `chunk`s, then exactly
//! one of `complete` or `error`. Heartbeat frames are interleaved on the same
//! channel so idle proxies keep the connection open while the model thinks.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use arena_core::battle::{AgentState, AgentType, BattleStatus, Iteration};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

/// The result of one committed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationOutcome {
    pub iteration: Iteration,
    pub agent_state: AgentState,
    pub battle_status: BattleStatus,
    pub winner: Option<AgentType>,
}

/// Events sent to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The iteration has begun.
    Start {
        iteration_number: u32,
        agent_type: AgentType,
    },

    /// A text fragment, forwarded as soon as it arrives.
    Chunk { content: String },

    /// Evaluation, state update and persistence all succeeded.
    Complete(IterationOutcome),

    /// The iteration failed; nothing was recorded.
    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Chunk { .. } => "chunk",
            Self::Complete(_) => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error { .. })
    }
}

/// What travels over the outbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StreamEvent),
    /// Non-data keep-alive.
    Heartbeat,
}

/// Keep-alive ticker. Stops when dropped.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Start ticking into `tx`; the first beat fires after one `period`.
    pub fn spawn(tx: mpsc::Sender<StreamFrame>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(StreamFrame::Heartbeat).await.is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Frames of one streamed iteration.
///
/// Dropping it (client disconnect) aborts the driver task, which in turn
/// drops its `Heartbeat`.
pub struct IterationStream {
    frames: ReceiverStream<StreamFrame>,
    _driver: AbortOnDrop,
}

impl IterationStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamFrame>, driver: JoinHandle<()>) -> Self {
        Self {
            frames: ReceiverStream::new(rx),
            _driver: AbortOnDrop(driver),
        }
    }
}

impl Stream for IterationStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}
