//! In-memory collaborators for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shopdesk_core::ids::SenderId;

use crate::agent::Responder;
use crate::error::MessengerError;
use crate::send_api::{MessageSender, OutboundMessage, SenderAction};

#[derive(Clone, Debug, PartialEq)]
pub enum SentItem {
    Message {
        recipient: SenderId,
        message: OutboundMessage,
    },
    Action {
        recipient: SenderId,
        action: SenderAction,
    },
}

/// Records everything sent through it.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentItem>>,
    fail_messages: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose `send_message` always fails (actions still succeed).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_messages: true,
        }
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().clone()
    }

    /// Text of every text message sent to `recipient`, in order.
    pub fn texts_to(&self, recipient: &SenderId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|item| match item {
                SentItem::Message {
                    recipient: r,
                    message: OutboundMessage::Text(text),
                } if r == recipient => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn actions_to(&self, recipient: &SenderId) -> Vec<SenderAction> {
        self.sent
            .lock()
            .iter()
            .filter_map(|item| match item {
                SentItem::Action { recipient: r, action } if r == recipient => Some(*action),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(
        &self,
        recipient: &SenderId,
        message: OutboundMessage,
    ) -> Result<(), MessengerError> {
        self.sent.lock().push(SentItem::Message {
            recipient: recipient.clone(),
            message,
        });
        if self.fail_messages {
            return Err(MessengerError::Upstream {
                status: 500,
                body: "send failed".into(),
            });
        }
        Ok(())
    }

    async fn send_action(&self, recipient: &SenderId, action: SenderAction) -> Result<(), MessengerError> {
        self.sent.lock().push(SentItem::Action {
            recipient: recipient.clone(),
            action,
        });
        Ok(())
    }
}

/// Scripted reply for one responder call.
pub enum ScriptedReply {
    Text(String),
    Error(MessengerError),
    /// Wait, then yield the inner reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Responder that returns pre-programmed replies in sequence, then a
/// fixed fallback once the script runs out.
pub struct ScriptedResponder {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: String,
    calls: Mutex<Vec<(SenderId, String)>>,
    call_count: AtomicUsize,
}

impl ScriptedResponder {
    pub fn new(script: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: "ok".to_string(),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn always(text: &str) -> Self {
        Self {
            fallback: text.to_string(),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<(SenderId, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, sender: &SenderId, message: &str) -> Result<String, MessengerError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push((sender.clone(), message.to_string()));

        let mut next = self.script.lock().pop_front();
        loop {
            match next {
                None => return Ok(self.fallback.clone()),
                Some(ScriptedReply::Text(text)) => return Ok(text),
                Some(ScriptedReply::Error(e)) => return Err(e),
                Some(ScriptedReply::Delay(delay, inner)) => {
                    tokio::time::sleep(delay).await;
                    next = Some(*inner);
                }
            }
        }
    }
}
