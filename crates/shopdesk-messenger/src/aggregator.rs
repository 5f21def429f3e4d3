//! Per-sender message debouncing.
//!
//! Fragments from one sender are buffered until the sender has been quiet
//! for the debounce delay, then forwarded to the [`Responder`] as a single
//! space-joined message and the reply is sent back.
//!
//! ```text
//!   Idle --push--> Buffering --push (re-arm)--> Buffering
//!                      |
//!                  timer fires: snapshot + clear
//!                      v
//!                  Flushing --reply sent--> Idle
//! ```
//!
//! The flush takes its snapshot and clears the buffer inside the sender's
//! map entry lock, so a fragment arriving mid-flush starts a new buffer and
//! timer rather than being lost. Each armed timer carries a generation; a
//! timer that fires after being superseded does nothing. Buffers live only
//! in memory and are dropped on restart.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use shopdesk_core::ids::SenderId;
use tracing::{debug, info, instrument, warn};

use crate::agent::Responder;
use crate::send_api::{notify, signal, MessageSender, OutboundMessage, SenderAction};
use crate::timer::DebounceTimer;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
pub const DEGRADED_REPLY: &str =
    "Sorry, the assistant is unavailable right now. Please try again later.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderPhase {
    Idle,
    Buffering,
    Flushing,
}

#[derive(Debug, Default)]
struct SenderState {
    buffer: Vec<String>,
    timer: Option<DebounceTimer>,
    generation: u64,
    in_flight: usize,
}

impl SenderState {
    fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.timer.is_none() && self.in_flight == 0
    }
}

struct Inner {
    states: DashMap<SenderId, SenderState>,
    sender: Arc<dyn MessageSender>,
    responder: Arc<dyn Responder>,
    delay: Duration,
}

#[derive(Clone)]
pub struct MessageAggregator {
    inner: Arc<Inner>,
}

impl MessageAggregator {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        responder: Arc<dyn Responder>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: DashMap::new(),
                sender,
                responder,
                delay,
            }),
        }
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.inner.sender
    }

    /// Buffer a fragment and (re)arm the sender's debounce timer.
    #[instrument(skip(self, sender_id, fragment), fields(sender_id = %sender_id))]
    pub fn push(&self, sender_id: &SenderId, fragment: String) {
        let mut state = self.inner.states.entry(sender_id.clone()).or_default();
        state.buffer.push(fragment);
        state.generation += 1;
        let generation = state.generation;

        let inner = Arc::clone(&self.inner);
        let id = sender_id.clone();
        let on_fire = async move { inner.flush(id, generation).await };
        state.timer = Some(match state.timer.take() {
            Some(previous) => previous.reschedule(self.inner.delay, generation, on_fire),
            None => DebounceTimer::schedule(self.inner.delay, generation, on_fire),
        });
        debug!(buffered = state.buffer.len(), generation, "fragment buffered");
    }

    pub fn phase(&self, sender_id: &SenderId) -> SenderPhase {
        match self.inner.states.get(sender_id) {
            None => SenderPhase::Idle,
            Some(state) if !state.buffer.is_empty() => SenderPhase::Buffering,
            Some(state) if state.in_flight > 0 => SenderPhase::Flushing,
            Some(_) => SenderPhase::Idle,
        }
    }

    /// Fragments currently waiting for `sender_id`.
    pub fn buffered(&self, sender_id: &SenderId) -> Vec<String> {
        self.inner
            .states
            .get(sender_id)
            .map(|s| s.buffer.clone())
            .unwrap_or_default()
    }

    /// Senders with any buffered, armed or in-flight state.
    pub fn active_senders(&self) -> usize {
        self.inner.states.len()
    }

    /// Cancel every armed timer and drop all buffers.
    pub fn shutdown(&self) {
        let dropped: usize = self
            .inner
            .states
            .iter()
            .map(|entry| {
                if let Some(timer) = &entry.timer {
                    timer.cancel();
                }
                entry.buffer.len()
            })
            .sum();
        self.inner.states.clear();
        if dropped > 0 {
            warn!(dropped, "discarding buffered messages on shutdown");
        }
    }
}

impl Inner {
    async fn flush(self: Arc<Self>, sender_id: SenderId, generation: u64) {
        let snapshot = {
            let Some(mut state) = self.states.get_mut(&sender_id) else {
                return;
            };
            if state.generation != generation {
                debug!(sender_id = %sender_id, generation, "stale timer ignored");
                return;
            }
            state.timer = None;
            state.in_flight += 1;
            std::mem::take(&mut state.buffer)
        };

        if !snapshot.is_empty() {
            self.forward(&sender_id, snapshot).await;
        }
        self.finish(&sender_id);
    }

    #[instrument(skip(self, sender_id, fragments), fields(sender_id = %sender_id, fragments = fragments.len()))]
    async fn forward(&self, sender_id: &SenderId, fragments: Vec<String>) {
        let combined = fragments.join(" ");
        info!("forwarding combined message");

        let typing = signal(&self.sender, sender_id, SenderAction::TypingOn);
        let reply = match self.responder.respond(sender_id, &combined).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "responder failed, message dropped");
                DEGRADED_REPLY.to_string()
            }
        };
        if let Err(e) = typing.await {
            debug!(error = %e, "typing indicator task failed");
        }
        if let Err(e) = self.sender.send_message(sender_id, OutboundMessage::Text(reply)).await {
            warn!(error = %e, "reply not delivered");
        }
        notify(self.sender.as_ref(), sender_id, SenderAction::TypingOff).await;
    }

    fn finish(&self, sender_id: &SenderId) {
        if let Some(mut state) = self.states.get_mut(sender_id) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.states.remove_if(sender_id, |_, state| state.is_idle());
    }
}
