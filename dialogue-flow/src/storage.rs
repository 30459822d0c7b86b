use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{Context, engine::StepKey, error::Result};

/// Persisted per-session record: current step plus the shared context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: Serialize + DeserializeOwned")]
pub struct DialogueSession<S> {
    pub id: String,
    pub current_step: Option<S>,
    pub context: Context,
    pub status_message: Option<String>,
}

impl<S: StepKey> DialogueSession<S> {
    /// Fresh session with no step yet: the router picks the entry point
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            current_step: None,
            context: Context::new(),
            status_message: None,
        }
    }
}

/// Trait for storing and retrieving dialogue sessions
#[async_trait]
pub trait SessionStorage<S: StepKey>: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<DialogueSession<S>>>;
    async fn save(&self, session: DialogueSession<S>) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage<S> {
    sessions: Arc<DashMap<String, DialogueSession<S>>>,
}

impl<S> InMemorySessionStorage<S> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl<S> Default for InMemorySessionStorage<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: StepKey> SessionStorage<S> for InMemorySessionStorage<S> {
    async fn load(&self, id: &str) -> Result<Option<DialogueSession<S>>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn save(&self, session: DialogueSession<S>) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}
