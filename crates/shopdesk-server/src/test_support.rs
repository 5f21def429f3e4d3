use std::sync::Arc;
use std::time::Duration;

use shopdesk_messenger::mock::{RecordingSender, ScriptedResponder};
use shopdesk_messenger::{MessageAggregator, WebhookHandler};
use shopdesk_store::{Database, EntityRegistry};

use crate::server::AppState;

pub const VERIFY_TOKEN: &str = "test-verify-token";

/// State over an in-memory database and recording messenger collaborators.
pub fn test_state() -> (AppState, Arc<RecordingSender>) {
    let db = Database::in_memory().unwrap();
    let sender = Arc::new(RecordingSender::new());
    let aggregator = MessageAggregator::new(
        sender.clone(),
        Arc::new(ScriptedResponder::always("ok")),
        Duration::from_secs(10),
    );
    let state = AppState::new(
        db,
        Arc::new(EntityRegistry::standard()),
        WebhookHandler::new(aggregator),
        VERIFY_TOKEN,
    );
    (state, sender)
}
