use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::user::Role;
use crate::store::users::UserDirectory;

/// Who a notification goes to. The directory resolves the selector to
/// concrete push tokens at dispatch time.
#[derive(Debug, Clone, Copy)]
pub enum Audience {
    AllActiveCouriers,
    User(Uuid),
    /// Dispatchers and admins.
    ActiveStaff,
    ActiveAdmins,
}

#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("push send failed: {0}")]
pub struct SinkError(pub String);

/// Outbound push transport. The real transport lives outside this core;
/// anything implementing this can be plugged in at startup.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), SinkError>;
}

/// Default sink: logs the message and pretends it was delivered.
pub struct LogSink;

#[async_trait]
impl PushSink for LogSink {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), SinkError> {
        debug!(token, title = %message.title, "push dispatched");
        Ok(())
    }
}

/// Captures every send for assertions in tests.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, PushMessage)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.title.clone())
            .collect()
    }
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), SinkError> {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), message.clone()));
        Ok(())
    }
}

/// Best-effort fanout. Constructed once at startup and injected through the
/// app state; business code hands it an audience and a message and moves on.
/// Per-recipient failures are logged here and go no further.
#[derive(Clone)]
pub struct Notifier {
    directory: UserDirectory,
    sink: Arc<dyn PushSink>,
}

impl Notifier {
    pub fn new(directory: UserDirectory, sink: Arc<dyn PushSink>) -> Self {
        Self { directory, sink }
    }

    /// Fire-and-forget: resolves the audience and spawns one send per
    /// recipient token. Recipients without a token are skipped silently.
    pub fn dispatch(&self, audience: Audience, message: PushMessage) {
        let targets = match audience {
            Audience::AllActiveCouriers => self.directory.push_targets(&[Role::Courier]),
            Audience::ActiveStaff => self
                .directory
                .push_targets(&[Role::Dispatcher, Role::Admin]),
            Audience::ActiveAdmins => self.directory.push_targets(&[Role::Admin]),
            Audience::User(id) => self.directory.push_target(id).into_iter().collect(),
        };

        for (user_id, token) in targets {
            let sink = self.sink.clone();
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.send(&token, &message).await {
                    warn!(user_id = %user_id, error = %err, "push send failed; dropping");
                }
            });
        }
    }
}
