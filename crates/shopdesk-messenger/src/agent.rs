use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shopdesk_core::ids::SenderId;
use tracing::{info, instrument, warn};

use crate::error::MessengerError;

pub const NO_RESPONSE_TEXT: &str = "No response from the assistant.";

/// Produces the reply to a combined customer message.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, sender: &SenderId, message: &str) -> Result<String, MessengerError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    store_id: &'a str,
    customer_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: Option<String>,
}

/// Client for the AI agent's `/agent/chat/` endpoint.
pub struct AgentChatClient {
    client: Client,
    chat_url: String,
    store_id: String,
    timeout: Duration,
}

impl AgentChatClient {
    pub fn new(agent_url: &str, store_id: impl Into<String>, timeout: Duration) -> Result<Self, MessengerError> {
        let client = Client::builder()
            .build()
            .map_err(|e| MessengerError::ClientSetup(e.to_string()))?;
        Ok(Self {
            client,
            chat_url: format!("{}/agent/chat/", agent_url.trim_end_matches('/')),
            store_id: store_id.into(),
            timeout,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }
}

#[async_trait]
impl Responder for AgentChatClient {
    #[instrument(skip(self, sender, message), fields(sender_id = %sender, chars = message.len()))]
    async fn respond(&self, sender: &SenderId, message: &str) -> Result<String, MessengerError> {
        let request = ChatRequest {
            store_id: &self.store_id,
            customer_id: sender.as_str(),
            message,
        };
        let resp = self
            .client
            .post(&self.chat_url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| MessengerError::from_transport(e, self.timeout))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "agent chat failed");
            return Err(MessengerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| MessengerError::InvalidResponse(e.to_string()))?;
        info!("agent replied");
        Ok(parsed
            .response
            .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AgentChatClient {
        AgentChatClient::new(&server.uri(), "store-1", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn chat_url_has_trailing_slash() {
        let c = AgentChatClient::new("http://agent.local/", "s", Duration::from_secs(1)).unwrap();
        assert_eq!(c.chat_url(), "http://agent.local/agent/chat/");
    }

    #[tokio::test]
    async fn posts_store_customer_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/chat/"))
            .and(body_json(json!({
                "store_id": "store-1",
                "customer_id": "psid-9",
                "message": "hello there"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Hi!"})))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server)
            .respond(&SenderId::from_raw("psid-9"), "hello there")
            .await
            .unwrap();
        assert_eq!(reply, "Hi!");
    }

    #[tokio::test]
    async fn missing_response_field_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"other": 1})))
            .mount(&server)
            .await;

        let reply = client(&server)
            .respond(&SenderId::from_raw("p"), "x")
            .await
            .unwrap();
        assert_eq!(reply, NO_RESPONSE_TEXT);
    }

    #[tokio::test]
    async fn non_ok_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .respond(&SenderId::from_raw("p"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let c = AgentChatClient::new(&server.uri(), "s", Duration::from_millis(50)).unwrap();
        let err = c.respond(&SenderId::from_raw("p"), "x").await.unwrap_err();
        assert!(matches!(err, MessengerError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .respond(&SenderId::from_raw("p"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::InvalidResponse(_)));
    }
}
