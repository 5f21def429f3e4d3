//! Messenger webhook integration: inbound event routing, per-sender message
//! debouncing, and the outbound Send API and agent chat clients.

pub mod agent;
pub mod aggregator;
pub mod error;
pub mod send_api;
pub mod timer;
pub mod webhook;

pub mod mock;

pub use agent::{AgentChatClient, Responder};
pub use aggregator::{MessageAggregator, SenderPhase};
pub use error::MessengerError;
pub use send_api::{GraphSendClient, MessageSender, OutboundMessage, SenderAction};
pub use webhook::{WebhookHandler, WebhookOutcome};
