//! Shared test doubles: an in-memory upstream queue, a journaling mock
//! session, and a configurable processor hook.

#![allow(dead_code)]

use async_trait::async_trait;
use flowbin_core::{
    BinEntry, BinnedRecordProcessor, Destination, EngineError, EngineResult, ProcessOutcome,
    Record, Session, SessionFactory,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Everything observable that mock sessions do, in global order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transferred {
        session: u64,
        record: u64,
        destination: Destination,
    },
    Committed {
        session: u64,
        records: Vec<u64>,
    },
    RolledBack {
        session: u64,
        records: Vec<u64>,
    },
}

pub type Journal = Arc<Mutex<Vec<SessionEvent>>>;
pub type Upstream = Arc<Mutex<VecDeque<Record>>>;

/// A session over a shared in-memory upstream queue.
///
/// Enforces the session protocol the engine depends on: commit with
/// unresolved records, double transfer, stale versions and double commit all
/// fail with `SessionViolation`. Rollback pushes pulled records back to the
/// front of the upstream queue (redelivery).
pub struct MockSession {
    id: u64,
    upstream: Upstream,
    journal: Journal,
    owned: Vec<Record>,
    transferred: Vec<u64>,
    finished: bool,
    fail_commit: bool,
}

#[async_trait]
impl Session for MockSession {
    async fn next(&mut self) -> EngineResult<Option<Record>> {
        if self.finished {
            return Err(EngineError::session_violation("next() on finished session"));
        }
        let record = self.upstream.lock().unwrap().pop_front();
        if let Some(record) = record.clone() {
            self.owned.push(record);
        }
        Ok(record)
    }

    async fn transfer(&mut self, record: &Record, destination: Destination) -> EngineResult<()> {
        if self.finished {
            return Err(EngineError::session_violation(
                "transfer() on finished session",
            ));
        }
        if self.transferred.contains(&record.id()) {
            return Err(EngineError::session_violation(format!(
                "record {} transferred twice",
                record.id()
            )));
        }
        let idx = match self.owned.iter().position(|r| r.id() == record.id()) {
            Some(idx) => idx,
            None => {
                return Err(EngineError::session_violation(format!(
                    "record {} not owned by session {}",
                    record.id(),
                    self.id
                )))
            }
        };
        if self.owned[idx].version() != record.version() {
            return Err(EngineError::session_violation(format!(
                "stale version of record {}",
                record.id()
            )));
        }

        self.owned.remove(idx);
        self.transferred.push(record.id());
        self.journal.lock().unwrap().push(SessionEvent::Transferred {
            session: self.id,
            record: record.id(),
            destination,
        });
        Ok(())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        if self.finished {
            return Err(EngineError::session_violation("session committed twice"));
        }
        if !self.owned.is_empty() {
            return Err(EngineError::session_violation(format!(
                "commit with {} unresolved records",
                self.owned.len()
            )));
        }
        if self.fail_commit {
            // backend failure: the session stays open so it can be rolled back
            return Err(EngineError::session("simulated commit failure"));
        }
        self.finished = true;
        self.journal.lock().unwrap().push(SessionEvent::Committed {
            session: self.id,
            records: self.transferred.clone(),
        });
        Ok(())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        self.finished = true;
        let records: Vec<u64> = self.owned.iter().map(|r| r.id()).collect();
        // redelivery: pulled records go back to the head of the queue
        let mut upstream = self.upstream.lock().unwrap();
        for record in self.owned.drain(..).rev() {
            upstream.push_front(record);
        }
        drop(upstream);
        self.journal.lock().unwrap().push(SessionEvent::RolledBack {
            session: self.id,
            records,
        });
        Ok(())
    }
}

pub struct MockSessionFactory {
    next_id: AtomicU64,
    pub upstream: Upstream,
    pub journal: Journal,
    fail_commit: Mutex<HashSet<u64>>,
}

impl MockSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            upstream: Arc::new(Mutex::new(VecDeque::new())),
            journal: Arc::new(Mutex::new(Vec::new())),
            fail_commit: Mutex::new(HashSet::new()),
        })
    }

    /// Make the session with the given id (ids are handed out sequentially
    /// starting at 1) fail every commit attempt
    pub fn fail_commit_for(&self, session: u64) {
        self.fail_commit.lock().unwrap().insert(session);
    }

    pub fn enqueue(&self, record: Record) {
        self.upstream.lock().unwrap().push_back(record);
    }

    pub fn upstream_len(&self) -> usize {
        self.upstream.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create_session(&self) -> EngineResult<Box<dyn Session>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            id,
            upstream: self.upstream.clone(),
            journal: self.journal.clone(),
            owned: Vec::new(),
            transferred: Vec::new(),
            finished: false,
            fail_commit: self.fail_commit.lock().unwrap().contains(&id),
        }))
    }
}

/// What the test processor should do with each bin it receives
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Return success and let the driver route the originals
    Complete,
    /// Route every input to failure itself, then report already-committed
    CommitOwnWay,
    /// Report a recoverable failure
    Recoverable,
    /// Report an unrecoverable failure
    Unrecoverable,
}

/// Groups records by their "group" attribute and records every processed bin
pub struct TestProcessor {
    pub behavior: Arc<Mutex<Behavior>>,
    pub processed: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl TestProcessor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            processed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn processed_bins(&self) -> Vec<Vec<u64>> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BinnedRecordProcessor for TestProcessor {
    fn group_key(&self, record: &Record) -> String {
        record.get_attribute("group").unwrap_or("default").to_string()
    }

    async fn process_bin(
        &self,
        entries: &mut [BinEntry],
        _bin_session: &mut dyn Session,
    ) -> ProcessOutcome {
        let ids: Vec<u64> = entries.iter().map(|e| e.record.id()).collect();
        self.processed.lock().unwrap().push(ids);

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Complete => ProcessOutcome::completed(),
            Behavior::CommitOwnWay => {
                for entry in entries.iter_mut() {
                    if let Err(e) = entry
                        .session
                        .transfer(&entry.record, Destination::Failure)
                        .await
                    {
                        return ProcessOutcome::unrecoverable(e);
                    }
                    if let Err(e) = entry.session.commit().await {
                        return ProcessOutcome::unrecoverable(e);
                    }
                }
                ProcessOutcome::already_committed()
            }
            Behavior::Recoverable => ProcessOutcome::recoverable("simulated downstream rejection"),
            Behavior::Unrecoverable => {
                ProcessOutcome::unrecoverable(EngineError::session("simulated downstream outage"))
            }
        }
    }
}

/// A record carrying a "group" attribute
pub fn record(id: u64, size: u64, group: &str) -> Record {
    let mut attrs = std::collections::HashMap::new();
    attrs.insert("group".to_string(), group.to_string());
    Record::with_attributes(id, size, attrs)
}
