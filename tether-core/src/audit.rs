//! Session and command audit trail.
//!
//! Each controller connection opens a session; every dispatched command and
//! notable failure is appended to it. The [`AuditLog`] trait is the seam for
//! persistent stores, [`MemoryAuditLog`] is the in-process implementation.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::error::TetherError;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warn => "WARN",
            AuditLevel::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSession {
    pub id: SessionId,
    pub token: String,
    pub started_ms: u64,
    pub ended_ms: Option<u64>,
    pub status: SessionStatus,
}

/// What one retention pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pruned {
    pub sessions: usize,
    pub records: usize,
}

impl Pruned {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.records == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: SessionId,
    pub level: AuditLevel,
    pub message: String,
    pub timestamp_ms: u64,
}

/// Store for sessions and their log lines.
///
/// Implementations must be callable from any task; they are shared behind
/// an `Arc` by the dispatcher and the agent service.
pub trait AuditLog: Send + Sync {
    /// Start a new session and return its id.
    fn open_session(&self, token: &str) -> Result<SessionId, TetherError>;

    /// Append one line to an open session.
    fn append(&self, session: SessionId, level: AuditLevel, message: &str)
        -> Result<(), TetherError>;

    /// Mark a session finished. Closing twice is an error.
    fn close_session(&self, session: SessionId, status: SessionStatus) -> Result<(), TetherError>;

    /// The most recently opened session that is still active.
    fn active_session(&self) -> Option<SessionId>;
}

// ── MemoryAuditLog ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct Ledger {
    next_id: SessionId,
    sessions: Vec<AuditSession>,
    records: Vec<AuditRecord>,
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

pub struct MemoryAuditLog {
    ledger: Mutex<Ledger>,
    clock: Clock,
}

impl fmt::Debug for MemoryAuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditLog")
            .field("ledger", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::with_clock(now_ms)
    }

    /// Use `clock` for every timestamp instead of the wall clock.
    pub fn with_clock(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                next_id: 1,
                ..Ledger::default()
            }),
            clock: Box::new(clock),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self, id: SessionId) -> Option<AuditSession> {
        self.lock().sessions.iter().find(|s| s.id == id).cloned()
    }

    /// Newest session opened with `token`.
    pub fn session_by_token(&self, token: &str) -> Option<AuditSession> {
        self.lock()
            .sessions
            .iter()
            .rev()
            .find(|s| s.token == token)
            .cloned()
    }

    /// All sessions, newest first.
    pub fn sessions(&self) -> Vec<AuditSession> {
        let mut sessions = self.lock().sessions.clone();
        sessions.reverse();
        sessions
    }

    /// Lines of one session, newest first.
    pub fn logs_for(&self, session: SessionId) -> Vec<AuditRecord> {
        self.lock()
            .records
            .iter()
            .rev()
            .filter(|r| r.session_id == session)
            .cloned()
            .collect()
    }

    /// Up to `limit` lines at `level` across all sessions, newest first.
    pub fn logs_by_level(&self, level: AuditLevel, limit: usize) -> Vec<AuditRecord> {
        self.lock()
            .records
            .iter()
            .rev()
            .filter(|r| r.level == level)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop every line older than `cutoff_ms`, and every finished session
    /// that ended before it. Active sessions are always kept.
    pub fn prune_before(&self, cutoff_ms: u64) -> Pruned {
        let mut ledger = self.lock();
        let (sessions, records) = (ledger.sessions.len(), ledger.records.len());

        ledger
            .sessions
            .retain(|s| s.ended_ms.is_none_or(|ended| ended >= cutoff_ms));
        let Ledger {
            sessions: kept,
            records: lines,
            ..
        } = &mut *ledger;
        lines.retain(|r| {
            r.timestamp_ms >= cutoff_ms && kept.iter().any(|s| s.id == r.session_id)
        });

        Pruned {
            sessions: sessions - ledger.sessions.len(),
            records: records - ledger.records.len(),
        }
    }
}

impl AuditLog for MemoryAuditLog {
    fn open_session(&self, token: &str) -> Result<SessionId, TetherError> {
        let now = (self.clock)();
        let mut ledger = self.lock();
        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.sessions.push(AuditSession {
            id,
            token: token.to_string(),
            started_ms: now,
            ended_ms: None,
            status: SessionStatus::Active,
        });
        Ok(id)
    }

    fn append(
        &self,
        session: SessionId,
        level: AuditLevel,
        message: &str,
    ) -> Result<(), TetherError> {
        let now = (self.clock)();
        let mut ledger = self.lock();
        match ledger.sessions.iter().find(|s| s.id == session) {
            Some(s) if s.status == SessionStatus::Active => {}
            Some(_) => return Err(TetherError::InvalidState("audit session is closed")),
            None => return Err(TetherError::InvalidState("unknown audit session")),
        }
        ledger.records.push(AuditRecord {
            session_id: session,
            level,
            message: message.to_string(),
            timestamp_ms: now,
        });
        Ok(())
    }

    fn close_session(&self, session: SessionId, status: SessionStatus) -> Result<(), TetherError> {
        if status == SessionStatus::Active {
            return Err(TetherError::InvalidArgument("cannot close a session as active"));
        }
        let now = (self.clock)();
        let mut ledger = self.lock();
        let entry = ledger
            .sessions
            .iter_mut()
            .find(|s| s.id == session)
            .ok_or(TetherError::InvalidState("unknown audit session"))?;
        if entry.status != SessionStatus::Active {
            return Err(TetherError::InvalidState("audit session is closed"));
        }
        entry.status = status;
        entry.ended_ms = Some(now);
        Ok(())
    }

    fn active_session(&self) -> Option<SessionId> {
        self.lock()
            .sessions
            .iter()
            .rev()
            .find(|s| s.status == SessionStatus::Active)
            .map(|s| s.id)
    }
}
