use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use wardline_core::errors::RelayError;
use wardline_core::ids::SessionId;
use wardline_core::turns::Turn;

/// Patient/room hints supplied over the wire, used to fill omitted
/// create_request arguments. Per-session state, never global.
#[derive(Clone, Debug, Default)]
pub struct PendingContext {
    pub patient: Option<String>,
    pub room: Option<String>,
}

#[derive(Default)]
struct Session {
    turns: Vec<Turn>,
    context: PendingContext,
    next_seq: u64,
}

/// All live sessions, keyed by id. Each entry sits behind its own async
/// mutex, so mutations on one session are serialized while distinct
/// sessions never contend.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Register a fresh session with empty history and context.
    pub fn open(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(Session::default())));
        info!(session_id = %id, "session opened");
        id
    }

    /// Discard all state for a session.
    pub fn close(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            info!(session_id = %id, "session closed");
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn get(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, RelayError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RelayError::UnknownSession(id.to_string()))
    }

    /// Append a turn to the session's committed history.
    pub async fn append(&self, id: &SessionId, turn: Turn) -> Result<(), RelayError> {
        let session = self.get(id)?;
        session.lock().await.turns.push(turn);
        Ok(())
    }

    /// Copy of the committed history, for building the backend call.
    pub async fn snapshot_turns(&self, id: &SessionId) -> Result<Vec<Turn>, RelayError> {
        let session = self.get(id)?;
        let guard = session.lock().await;
        Ok(guard.turns.clone())
    }

    /// Next fragment sequence number; strictly monotonic per session.
    pub async fn next_seq(&self, id: &SessionId) -> Result<u64, RelayError> {
        let session = self.get(id)?;
        let mut guard = session.lock().await;
        let seq = guard.next_seq;
        guard.next_seq += 1;
        Ok(seq)
    }

    /// Merge patient/room hints into the session context. None leaves the
    /// existing value in place.
    pub async fn set_context(
        &self,
        id: &SessionId,
        patient: Option<String>,
        room: Option<String>,
    ) -> Result<(), RelayError> {
        let session = self.get(id)?;
        let mut guard = session.lock().await;
        if patient.is_some() {
            guard.context.patient = patient;
        }
        if room.is_some() {
            guard.context.room = room;
        }
        Ok(())
    }

    pub async fn context(&self, id: &SessionId) -> Result<PendingContext, RelayError> {
        let session = self.get(id)?;
        let guard = session.lock().await;
        Ok(guard.context.clone())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
