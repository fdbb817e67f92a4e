//! Persistence collaborator contract.
//!
//! The storage engine lives outside this crate; the pipeline only needs a
//! save/get surface. It calls `save` exactly once per completed run and
//! never reads mid-pipeline. An in-memory implementation ships for tests
//! and embedding callers.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::pipeline::types::{GuardrailOutcome, Transcript};

/// One persisted analysis session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session_id: Uuid,
    pub transcript: Transcript,
    pub outcome: GuardrailOutcome,
    pub has_emergency: bool,
}

/// Contract the pipeline holds against the storage engine.
pub trait SessionStore: Send + Sync {
    fn save(
        &self,
        session_id: Uuid,
        transcript: &Transcript,
        outcome: &GuardrailOutcome,
        has_emergency: bool,
    ) -> Result<(), String>;

    fn get_last(&self) -> Option<StoredSession>;

    fn get_by_id(&self, session_id: Uuid) -> Option<StoredSession>;
}

/// In-memory store keyed by session id, insertion order retained.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<Uuid, StoredSession>,
    order: Vec<Uuid>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(
        &self,
        session_id: Uuid,
        transcript: &Transcript,
        outcome: &GuardrailOutcome,
        has_emergency: bool,
    ) -> Result<(), String> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.sessions.insert(
            session_id,
            StoredSession {
                session_id,
                transcript: transcript.clone(),
                outcome: outcome.clone(),
                has_emergency,
            },
        );
        inner.order.push(session_id);
        Ok(())
    }

    fn get_last(&self) -> Option<StoredSession> {
        let inner = self.inner.lock().ok()?;
        let last = inner.order.last()?;
        inner.sessions.get(last).cloned()
    }

    fn get_by_id(&self, session_id: Uuid) -> Option<StoredSession> {
        let inner = self.inner.lock().ok()?;
        inner.sessions.get(&session_id).cloned()
    }
}
