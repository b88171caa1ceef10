//! Bounded pool of reusable long-lived client handles.
//!
//! Expensive client handles (broker consumers, protocol connections) are
//! amortized across many work cycles: `ConsumerPool::obtain` binds an idle
//! handle to a unit-of-work session and returns a [`ConsumerLease`]. Closing
//! the lease settles the session (rollback unless committed) and returns the
//! handle to the pool, unless the lease was poisoned or the pool has no room.
//!
//! Shutdown is bounded-wait-then-force: in-flight leases get a grace period to
//! finish normally, after which the pool cancels its shutdown token and wakes
//! every straggler out of blocking I/O.

use crate::traits::Session;
use crate::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A long-lived client handle managed by the pool.
///
/// Implementations wrap whatever external client the concrete processor
/// talks to. `wake` must interrupt any blocking I/O the handle is stuck in;
/// `close` releases the handle permanently. Both may be called at most once
/// per effect but must tolerate repeats.
#[async_trait]
pub trait PooledClient: Send + Sync {
    /// Interrupt any blocking operation in flight on this handle
    async fn wake(&self);

    /// Release the handle permanently
    async fn close(&self) -> EngineResult<()>;
}

/// Lazily constructs client handles for the pool
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self) -> EngineResult<Arc<dyn PooledClient>>;
}

/// Counters describing pool activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub clients_created: u64,
    pub clients_closed: u64,
    pub leases_obtained: u64,
    pub active_leases: usize,
    pub idle_clients: usize,
}

// All mutable pool state lives in this one struct under one mutex; no
// counters are scattered across separate atomics.
struct PoolState {
    idle: VecDeque<Arc<dyn PooledClient>>,
    active: Vec<Weak<dyn PooledClient>>,
    created: u64,
    closed: u64,
    leases_obtained: u64,
    closing: bool,
}

impl PoolState {
    fn prune_active(&mut self) {
        self.active.retain(|w| w.strong_count() > 0);
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    factory: Arc<dyn ClientFactory>,
    max_leases: usize,
    shutdown: CancellationToken,
}

/// A fixed-capacity pool of reusable client handles.
///
/// Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct ConsumerPool {
    inner: Arc<PoolInner>,
}

impl ConsumerPool {
    /// Create a pool that lazily grows up to `max_leases` concurrent handles
    pub fn new(factory: Arc<dyn ClientFactory>, max_leases: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    active: Vec::new(),
                    created: 0,
                    closed: 0,
                    leases_obtained: 0,
                    closing: false,
                }),
                factory,
                max_leases,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Obtain a lease binding a client handle to the given session.
    ///
    /// Pops an idle handle if one is available, otherwise lazily constructs a
    /// new one while under the concurrent-lease bound. Returns `Ok(None)`
    /// when the pool is at capacity with nothing idle - the caller backs off
    /// rather than queuing demand. Never blocks indefinitely.
    pub async fn obtain(&self, session: Box<dyn Session>) -> EngineResult<Option<ConsumerLease>> {
        let client = {
            let mut state = self.inner.state.lock();
            if state.closing {
                return Err(EngineError::PoolClosed);
            }
            state.prune_active();

            if let Some(client) = state.idle.pop_front() {
                Some(client)
            } else if state.active.len() >= self.inner.max_leases {
                return Ok(None);
            } else {
                None
            }
        };

        // create outside the lock; the capacity check above is racy only
        // against other creators, which the re-check below settles
        let client = match client {
            Some(client) => client,
            None => {
                let created = self.inner.factory.create().await?;
                let mut state = self.inner.state.lock();
                if state.closing {
                    drop(state);
                    let _ = created.close().await;
                    return Err(EngineError::PoolClosed);
                }
                if state.active.len() >= self.inner.max_leases {
                    drop(state);
                    let _ = created.close().await;
                    return Ok(None);
                }
                state.created += 1;
                created
            }
        };

        let mut state = self.inner.state.lock();
        state.leases_obtained += 1;
        state.active.push(Arc::downgrade(&client));
        drop(state);

        Ok(Some(ConsumerLease {
            client: Some(client),
            session: Some(session),
            pool: self.clone(),
            cancel: self.inner.shutdown.child_token(),
            poisoned: false,
            committed: false,
        }))
    }

    /// Shut the pool down with a bounded grace period.
    ///
    /// Idle handles are closed immediately. Active leases get `grace` to
    /// finish normally; any still active past the deadline are forcibly woken
    /// (cancelling their tokens and interrupting blocking I/O). Safe to call
    /// repeatedly.
    pub async fn close(&self, grace: Duration) {
        let idle: Vec<Arc<dyn PooledClient>> = {
            let mut state = self.inner.state.lock();
            state.closing = true;
            state.idle.drain(..).collect()
        };

        for client in idle {
            if let Err(e) = client.close().await {
                warn!("Failed to close idle client: {}", e);
            }
            self.inner.state.lock().closed += 1;
        }

        let deadline = Instant::now() + grace;
        loop {
            let active = {
                let mut state = self.inner.state.lock();
                state.prune_active();
                state.active.len()
            };
            if active == 0 {
                info!("Consumer pool drained");
                return;
            }
            if Instant::now() >= deadline {
                warn!(active, "Grace period elapsed, force-waking active leases");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // force phase: cancel every lease's token and kick blocked handles
        self.inner.shutdown.cancel();
        let stragglers: Vec<Arc<dyn PooledClient>> = {
            let state = self.inner.state.lock();
            state.active.iter().filter_map(|w| w.upgrade()).collect()
        };
        for client in stragglers {
            client.wake().await;
        }
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        let mut state = self.inner.state.lock();
        state.prune_active();
        PoolStats {
            clients_created: state.created,
            clients_closed: state.closed,
            leases_obtained: state.leases_obtained,
            active_leases: state.active.len(),
            idle_clients: state.idle.len(),
        }
    }

    /// Return a handle after its lease ended, or retire it.
    async fn release(&self, client: Arc<dyn PooledClient>, poisoned: bool) {
        let retire = {
            let mut state = self.inner.state.lock();
            state.prune_active();
            if poisoned || state.closing || state.idle.len() >= self.inner.max_leases {
                true
            } else {
                state.idle.push_back(client.clone());
                false
            }
        };

        if retire {
            if let Err(e) = client.close().await {
                warn!("Failed to close retired client: {}", e);
            }
            self.inner.state.lock().closed += 1;
        }
    }
}

/// A client handle bound to one unit-of-work session for the duration of one
/// work cycle.
///
/// The lease multiplexes three lifecycles: the underlying handle, the bound
/// session, and a poisoned flag. Always settle a lease with [`close`] - the
/// session is rolled back at close time unless [`commit`] was called first,
/// and the handle is returned to the pool or retired. Dropping a lease
/// without closing it leaks the handle and only logs a warning; the pool
/// never relies on drop-time cleanup for network resources.
///
/// [`close`]: ConsumerLease::close
/// [`commit`]: ConsumerLease::commit
pub struct ConsumerLease {
    client: Option<Arc<dyn PooledClient>>,
    session: Option<Box<dyn Session>>,
    pool: ConsumerPool,
    cancel: CancellationToken,
    poisoned: bool,
    committed: bool,
}

impl ConsumerLease {
    /// The leased client handle
    pub fn client(&self) -> &dyn PooledClient {
        // present from construction until close() takes it
        self.client
            .as_deref()
            .expect("lease used after close")
    }

    /// The bound session
    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session
            .as_deref_mut()
            .expect("lease used after close")
    }

    /// Cancellation token for in-flight I/O; cancelled when the pool
    /// force-closes after its grace period
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Commit the bound session. After a successful commit, closing the
    /// lease will not roll the session back.
    pub async fn commit(&mut self) -> EngineResult<()> {
        match self.session.as_deref_mut() {
            Some(session) => {
                session.commit().await?;
                self.committed = true;
                Ok(())
            }
            None => Err(EngineError::session_violation(
                "commit on a closed lease",
            )),
        }
    }

    /// Mark the leased handle unusable; it will be retired instead of
    /// returned to the pool
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Settle the lease: roll back the session unless committed, then return
    /// the handle to the pool or retire it.
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if !self.committed {
                if let Err(e) = session.rollback().await {
                    warn!("Failed to roll back lease session: {}", e);
                }
            }
        }

        if let Some(client) = self.client.take() {
            self.pool.release(client, self.poisoned).await;
        }
        debug!("Lease closed");
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        if self.client.is_some() {
            // the handle is lost to the pool; nothing async can run here
            warn!("ConsumerLease dropped without close(); client handle leaked");
        }
    }
}
