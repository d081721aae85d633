//! Upload session bookkeeping and completion detection
//!
//! A client delivers one capture session as several independent batches (chunks).
//! [`BatchTracker`] records which chunk indices have been applied to each session and
//! reports completion exactly once, when the last distinct index arrives.
//!
//! Each session has its own async mutex; the session table has another that is only
//! held for lookups and removal. Locks are always taken session first, then table.
//! Once a session leaves `Collecting` it is moved from the active table to the ended
//! table under its own lock. Ended ids are remembered until the next sweep past their
//! TTL, so a chunk retried after completion or expiry is reported as
//! [`ChunkOutcome::Ended`] instead of opening a second session under the same id.

use crate::error::SessionError;
use crate::types::{SessionId, SessionProgress, SessionStatus};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Result type for tracker operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Upper bound on remembered ended sessions; the oldest record is evicted beyond it
const MAX_ENDED_SESSIONS: usize = 10_000;

struct SessionEntry {
    project_id: String,
    expected: u32,
    created_at: Instant,
    state: Mutex<SessionState>,
}

struct SessionState {
    applied: HashSet<u32>,
    paths: Vec<PathBuf>,
    status: SessionStatus,
}

impl SessionState {
    fn received(&self) -> u32 {
        self.applied.len() as u32
    }
}

struct EndedSession {
    status: SessionStatus,
    ended_at: Instant,
}

#[derive(Default)]
struct SessionTable {
    active: HashMap<SessionId, Arc<SessionEntry>>,
    ended: HashMap<SessionId, EndedSession>,
}

enum Lookup {
    Active(Arc<SessionEntry>),
    Ended(SessionStatus),
}

/// Everything accumulated for a session that just completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    /// Session id
    pub id: SessionId,
    /// Project the session belongs to
    pub project_id: String,
    /// Paths stored by every chunk, in application order
    pub files: Vec<PathBuf>,
    /// Number of chunks the session consisted of
    pub expected: u32,
}

/// Outcome of applying one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk recorded; more are expected
    Pending {
        /// Distinct chunks applied so far
        received: u32,
        /// Chunks the session expects
        expected: u32,
    },
    /// The index was already applied; nothing changed
    Duplicate {
        /// Distinct chunks applied so far
        received: u32,
        /// Chunks the session expects
        expected: u32,
    },
    /// This chunk completed the session; it has been removed from the tracker
    Complete(CompletedSession),
    /// The session already completed or expired; nothing changed
    Ended {
        /// Final status of the session
        status: SessionStatus,
    },
}

impl ChunkOutcome {
    /// Whether this chunk completed the session
    pub fn is_complete(&self) -> bool {
        matches!(self, ChunkOutcome::Complete(_))
    }
}

/// Whether `start` created a session or found an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was created in `Collecting`
    Created,
    /// The session already existed with the same chunk count
    Existing,
    /// The session already completed or expired and cannot take more chunks
    Ended(SessionStatus),
}

/// Tracks in-flight upload sessions
#[derive(Default)]
pub struct BatchTracker {
    sessions: Mutex<SessionTable>,
}

impl BatchTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, or confirm an existing one
    ///
    /// Idempotent for a matching `expected` count. An id that recently completed or
    /// expired is not reopened and reports [`StartOutcome::Ended`].
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidBatchSize`] if `expected` is 0
    /// - [`SessionError::InconsistentBatchSize`] if the session exists with another count
    pub async fn start(
        &self,
        id: &SessionId,
        project_id: &str,
        expected: u32,
    ) -> SessionResult<StartOutcome> {
        if expected == 0 {
            return Err(SessionError::InvalidBatchSize { id: id.clone() });
        }

        let mut table = self.sessions.lock().await;
        if let Some(entry) = table.active.get(id) {
            if entry.expected != expected {
                return Err(SessionError::InconsistentBatchSize {
                    id: id.clone(),
                    existing: entry.expected,
                    requested: expected,
                });
            }
            return Ok(StartOutcome::Existing);
        }
        if let Some(ended) = table.ended.get(id) {
            return Ok(StartOutcome::Ended(ended.status));
        }

        table.active.insert(
            id.clone(),
            Arc::new(SessionEntry {
                project_id: project_id.to_string(),
                expected,
                created_at: Instant::now(),
                state: Mutex::new(SessionState {
                    applied: HashSet::new(),
                    paths: Vec::new(),
                    status: SessionStatus::Collecting,
                }),
            }),
        );
        tracing::debug!(session_id = %id, project = project_id, expected, "session started");
        Ok(StartOutcome::Created)
    }

    /// Apply a chunk's stored paths to a session
    ///
    /// A redelivered index is a no-op and reports [`ChunkOutcome::Duplicate`]. The chunk
    /// that brings the distinct count to `expected` gets [`ChunkOutcome::Complete`] with
    /// every accumulated path; exactly one caller ever sees that for a given session.
    /// Chunks arriving after that report [`ChunkOutcome::Ended`].
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownSession`] if the session was never started
    /// - [`SessionError::ChunkOutOfRange`] if `index >= expected`
    pub async fn add_chunk(
        &self,
        id: &SessionId,
        index: u32,
        stored: Vec<PathBuf>,
    ) -> SessionResult<ChunkOutcome> {
        let entry = match self.lookup(id).await? {
            Lookup::Active(entry) => entry,
            Lookup::Ended(status) => {
                tracing::debug!(session_id = %id, index, ?status, "chunk for ended session ignored");
                return Ok(ChunkOutcome::Ended { status });
            }
        };

        if index >= entry.expected {
            return Err(SessionError::ChunkOutOfRange {
                id: id.clone(),
                index,
                expected: entry.expected,
            });
        }

        let mut state = entry.state.lock().await;
        if state.status != SessionStatus::Collecting {
            return Ok(ChunkOutcome::Ended {
                status: state.status,
            });
        }

        if state.applied.contains(&index) {
            tracing::debug!(session_id = %id, index, "duplicate chunk ignored");
            return Ok(ChunkOutcome::Duplicate {
                received: state.received(),
                expected: entry.expected,
            });
        }

        state.applied.insert(index);
        state.paths.extend(stored);
        let received = state.received();

        if received < entry.expected {
            return Ok(ChunkOutcome::Pending {
                received,
                expected: entry.expected,
            });
        }

        state.status = SessionStatus::Complete;
        let files = std::mem::take(&mut state.paths);
        self.retire(id, &entry, SessionStatus::Complete).await;
        drop(state);

        tracing::info!(
            session_id = %id,
            project = %entry.project_id,
            chunks = entry.expected,
            files = files.len(),
            "session complete"
        );

        Ok(ChunkOutcome::Complete(CompletedSession {
            id: id.clone(),
            project_id: entry.project_id.clone(),
            files,
            expected: entry.expected,
        }))
    }

    /// Progress snapshot of a collecting session
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownSession`] if the session is not collecting.
    pub async fn progress(&self, id: &SessionId) -> SessionResult<SessionProgress> {
        let entry = match self.lookup(id).await? {
            Lookup::Active(entry) => entry,
            Lookup::Ended(_) => return Err(SessionError::UnknownSession { id: id.clone() }),
        };
        let state = entry.state.lock().await;
        Ok(SessionProgress {
            received_count: state.received(),
            expected_count: entry.expected,
            status: state.status,
        })
    }

    /// Expire every collecting session older than `ttl`
    ///
    /// Ids are snapshotted under the table lock; each candidate is then re-checked under
    /// its own lock, so a session that completed in the meantime is left alone. Ended
    /// records older than `ttl` are forgotten in the same pass.
    /// Returns the ids that were expired.
    pub async fn expire_older_than(&self, ttl: Duration) -> Vec<SessionId> {
        let candidates: Vec<(SessionId, Arc<SessionEntry>)> = {
            let mut table = self.sessions.lock().await;
            table.ended.retain(|_, ended| ended.ended_at.elapsed() <= ttl);
            table
                .active
                .iter()
                .filter(|(_, entry)| entry.created_at.elapsed() > ttl)
                .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
                .collect()
        };

        let mut expired = Vec::new();
        for (id, entry) in candidates {
            let mut state = entry.state.lock().await;
            if state.status != SessionStatus::Collecting {
                continue;
            }
            state.status = SessionStatus::Expired;
            self.retire(&id, &entry, SessionStatus::Expired).await;
            tracing::info!(
                session_id = %id,
                received = state.received(),
                expected = entry.expected,
                "session expired"
            );
            expired.push(id);
        }
        expired
    }

    /// Number of sessions currently collecting
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.active.len()
    }

    /// Whether no sessions are collecting
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.active.is_empty()
    }

    async fn lookup(&self, id: &SessionId) -> SessionResult<Lookup> {
        let table = self.sessions.lock().await;
        if let Some(entry) = table.active.get(id) {
            return Ok(Lookup::Active(Arc::clone(entry)));
        }
        match table.ended.get(id) {
            Some(ended) => Ok(Lookup::Ended(ended.status)),
            None => Err(SessionError::UnknownSession { id: id.clone() }),
        }
    }

    // Only moves the exact entry we hold; a fresh session under the same id stays.
    async fn retire(&self, id: &SessionId, entry: &Arc<SessionEntry>, status: SessionStatus) {
        let mut table = self.sessions.lock().await;
        if !table
            .active
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            return;
        }
        table.active.remove(id);

        if table.ended.len() >= MAX_ENDED_SESSIONS
            && let Some(oldest) = table
                .ended
                .iter()
                .min_by_key(|(_, ended)| ended.ended_at)
                .map(|(id, _)| id.clone())
        {
            table.ended.remove(&oldest);
        }
        table.ended.insert(
            id.clone(),
            EndedSession {
                status,
                ended_at: Instant::now(),
            },
        );
    }
}
