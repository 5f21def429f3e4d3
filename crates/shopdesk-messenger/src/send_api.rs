use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use shopdesk_core::ids::SenderId;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::MessengerError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of an outbound message: plain text or a provider-specific structure
/// (templates, quick replies) passed through untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Text(String),
    Structured(Value),
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// The `message` object of a Send API request.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Text(text) => json!({ "text": text }),
            Self::Structured(value) => value.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderAction {
    TypingOn,
    TypingOff,
    MarkSeen,
}

/// Delivers messages and sender actions to a chat participant.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        recipient: &SenderId,
        message: OutboundMessage,
    ) -> Result<(), MessengerError>;

    async fn send_action(&self, recipient: &SenderId, action: SenderAction) -> Result<(), MessengerError>;
}

/// Send a sender action in the background. Failures are logged only. Await
/// the handle before any send that must reach the recipient after it.
pub fn signal(
    sender: &Arc<dyn MessageSender>,
    recipient: &SenderId,
    action: SenderAction,
) -> JoinHandle<()> {
    let sender = Arc::clone(sender);
    let recipient = recipient.clone();
    tokio::spawn(async move { notify(sender.as_ref(), &recipient, action).await })
}

/// Send a sender action, logging instead of returning failures.
pub async fn notify(sender: &dyn MessageSender, recipient: &SenderId, action: SenderAction) {
    if let Err(e) = sender.send_action(recipient, action).await {
        debug!(sender_id = %recipient, ?action, error = %e, "sender action failed");
    }
}

/// Reply to `recipient` with typing indicators around the send. The three
/// calls go out in order; only the message result is returned.
pub async fn reply_with_typing(
    sender: &Arc<dyn MessageSender>,
    recipient: &SenderId,
    message: OutboundMessage,
) -> Result<(), MessengerError> {
    notify(sender.as_ref(), recipient, SenderAction::TypingOn).await;
    let result = sender.send_message(recipient, message).await;
    notify(sender.as_ref(), recipient, SenderAction::TypingOff).await;
    result
}

/// Graph API `me/messages` client.
pub struct GraphSendClient {
    client: Client,
    endpoint: String,
    access_token: SecretString,
}

impl GraphSendClient {
    pub fn new(
        graph_url: &str,
        api_version: &str,
        access_token: SecretString,
    ) -> Result<Self, MessengerError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MessengerError::ClientSetup(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}/me/messages",
                graph_url.trim_end_matches('/'),
                api_version.trim_matches('/')
            ),
            access_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: &Value) -> Result<(), MessengerError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|e| MessengerError::from_transport(e, REQUEST_TIMEOUT))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MessengerError::Upstream { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for GraphSendClient {
    #[instrument(skip(self, recipient, message), fields(sender_id = %recipient))]
    async fn send_message(
        &self,
        recipient: &SenderId,
        message: OutboundMessage,
    ) -> Result<(), MessengerError> {
        let body = json!({
            "recipient": { "id": recipient },
            "message": message.to_payload(),
        });
        match self.post(&body).await {
            Ok(()) => {
                debug!("message sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "send message failed");
                Err(e)
            }
        }
    }

    async fn send_action(&self, recipient: &SenderId, action: SenderAction) -> Result<(), MessengerError> {
        let body = json!({
            "recipient": { "id": recipient },
            "sender_action": action,
        });
        self.post(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingSender, SentItem};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GraphSendClient {
        GraphSendClient::new(&server.uri(), "v11.0", SecretString::from("page-token".to_string())).unwrap()
    }

    #[tokio::test]
    async fn reply_is_bracketed_by_typing_in_order() {
        let recording = Arc::new(RecordingSender::failing());
        let sender: Arc<dyn MessageSender> = recording.clone();
        let id = SenderId::from_raw("psid-9");

        let result = reply_with_typing(&sender, &id, OutboundMessage::text("hello")).await;
        assert!(matches!(result, Err(MessengerError::Upstream { status: 500, .. })));
        assert_eq!(
            recording.sent(),
            vec![
                SentItem::Action { recipient: id.clone(), action: SenderAction::TypingOn },
                SentItem::Message { recipient: id.clone(), message: OutboundMessage::text("hello") },
                SentItem::Action { recipient: id.clone(), action: SenderAction::TypingOff },
            ]
        );
    }

    #[test]
    fn text_payload_wraps_text() {
        assert_eq!(OutboundMessage::text("hi").to_payload(), json!({"text": "hi"}));
        let structured = json!({"attachment": {"type": "template"}});
        assert_eq!(
            OutboundMessage::Structured(structured.clone()).to_payload(),
            structured
        );
    }

    #[test]
    fn endpoint_joins_version() {
        let c = GraphSendClient::new("https://graph.example.com/", "v11.0", SecretString::from("t".to_string()))
            .unwrap();
        assert_eq!(c.endpoint(), "https://graph.example.com/v11.0/me/messages");
    }

    #[tokio::test]
    async fn send_message_posts_recipient_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v11.0/me/messages"))
            .and(query_param("access_token", "page-token"))
            .and(body_json(json!({
                "recipient": {"id": "psid-1"},
                "message": {"text": "hello"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message_id": "m1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_message(&SenderId::from_raw("psid-1"), OutboundMessage::text("hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_action_posts_sender_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v11.0/me/messages"))
            .and(body_json(json!({
                "recipient": {"id": "psid-1"},
                "sender_action": "typing_on"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_action(&SenderId::from_raw("psid-1"), SenderAction::TypingOn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_message(&SenderId::from_raw("p"), OutboundMessage::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::Upstream { status: 400, ref body } if body == "bad token"));
    }
}
