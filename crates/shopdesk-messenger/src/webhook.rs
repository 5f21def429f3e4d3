//! Inbound webhook payloads and event routing.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use shopdesk_core::ids::SenderId;
use tracing::{debug, instrument, warn};

use crate::aggregator::MessageAggregator;
use crate::error::MessengerError;
use crate::send_api::{reply_with_typing, MessageSender, OutboundMessage};

pub const PAGE_OBJECT: &str = "page";
pub const EMPTY_MESSAGE_TEXT: &str = "Received an empty message.";

pub const POSTBACK_YES_REPLY: &str = "Thanks!";
pub const POSTBACK_NO_REPLY: &str = "Oops, try sending another image.";
pub const POSTBACK_UNKNOWN_REPLY: &str = "Sorry, I didn't understand your request.";

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagingEvent {
    pub sender: Option<Participant>,
    pub message: Option<InboundMessage>,
    pub postback: Option<Postback>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Participant {
    pub id: Option<SenderId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub payload: AttachmentPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachmentPayload {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Postback {
    pub payload: Option<String>,
    pub title: Option<String>,
}

impl InboundMessage {
    /// Render text and the first attachment URL as one display string.
    pub fn render(&self) -> String {
        let text = self.text.as_deref().filter(|t| !t.is_empty());
        let url = self
            .attachments
            .first()
            .and_then(|a| a.payload.url.as_deref())
            .filter(|u| !u.is_empty());
        match (text, url) {
            (Some(text), Some(url)) => format!("{text}\nAttachment: {url}"),
            (Some(text), None) => text.to_string(),
            (None, Some(url)) => format!("Attachment: {url}"),
            (None, None) => EMPTY_MESSAGE_TEXT.to_string(),
        }
    }
}

impl Postback {
    pub fn reply(&self) -> &'static str {
        match self.payload.as_deref() {
            Some("yes") => POSTBACK_YES_REPLY,
            Some("no") => POSTBACK_NO_REPLY,
            _ => POSTBACK_UNKNOWN_REPLY,
        }
    }
}

/// Result of a subscription verification request.
#[derive(Debug, PartialEq, Eq)]
pub enum Verification {
    /// Echo the challenge back.
    Accepted(String),
    /// Mode or token did not match.
    Forbidden,
    /// Mode or token absent.
    Missing,
}

pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Verification {
    match (non_empty(mode), non_empty(token)) {
        (Some(mode), Some(token)) => {
            if mode == "subscribe" && token == expected_token {
                Verification::Accepted(challenge.unwrap_or_default().to_string())
            } else {
                Verification::Forbidden
            }
        }
        _ => Verification::Missing,
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Received,
    /// The payload is not a page subscription event.
    Invalid,
}

/// Routes webhook events: messages to the aggregator, postbacks to an
/// immediate canned reply.
#[derive(Clone)]
pub struct WebhookHandler {
    aggregator: MessageAggregator,
    sender: Arc<dyn MessageSender>,
}

impl WebhookHandler {
    pub fn new(aggregator: MessageAggregator) -> Self {
        let sender = Arc::clone(aggregator.sender());
        Self { aggregator, sender }
    }

    pub fn aggregator(&self) -> &MessageAggregator {
        &self.aggregator
    }

    #[instrument(skip_all)]
    pub async fn handle(&self, body: Value) -> Result<WebhookOutcome, MessengerError> {
        if body.get("object").and_then(Value::as_str) != Some(PAGE_OBJECT) {
            return Ok(WebhookOutcome::Invalid);
        }
        let payload: WebhookPayload = serde_json::from_value(body)
            .map_err(|e| MessengerError::InvalidPayload(e.to_string()))?;

        for entry in payload.entry {
            // Only the first event of each entry is processed.
            let Some(event) = entry.messaging.into_iter().next() else {
                continue;
            };
            let Some(sender_id) = event
                .sender
                .and_then(|s| s.id)
                .filter(|id| !id.as_str().is_empty())
            else {
                debug!("event without sender skipped");
                continue;
            };

            if let Some(message) = event.message {
                self.aggregator.push(&sender_id, message.render());
            } else if let Some(postback) = event.postback {
                debug!(sender_id = %sender_id, payload = ?postback.payload, "postback");
                let reply = OutboundMessage::text(postback.reply());
                if let Err(e) = reply_with_typing(&self.sender, &sender_id, reply).await {
                    warn!(sender_id = %sender_id, error = %e, "postback reply failed");
                }
            }
        }
        Ok(WebhookOutcome::Received)
    }
}
