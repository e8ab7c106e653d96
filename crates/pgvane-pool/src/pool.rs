use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use pgvane_common::{Backend, NodeEvent, NodeSpec, Result, Session, VaneError};

/// Occupancy of a single node's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Open sessions, leased and idle combined.
    pub open: usize,
    /// Sessions parked in the pool waiting for the next acquire.
    pub idle: usize,
}

/// State shared between a pool and the leases it has handed out.
struct PoolShared<B: Backend> {
    node_id: String,
    /// Caps leased + in-flight connects at the configured pool size. A
    /// lease holds one permit for its whole lifetime.
    limit: Arc<Semaphore>,
    idle: Mutex<VecDeque<B::Session>>,
    /// Open sessions (leased + idle); drops below `limit`'s capacity when
    /// sessions are discarded.
    open: AtomicUsize,
    events: UnboundedSender<NodeEvent>,
}

impl<B: Backend> PoolShared<B> {
    fn report_failure(&self, reason: String) {
        warn!(
            node = %self.node_id,
            reason = %reason,
            "connection failure, reporting node suspect"
        );
        let _ = self.events.send(NodeEvent::ConnectionFailed {
            node_id: self.node_id.clone(),
            reason,
        });
    }
}

/// Bounded connection pool for one node.
///
/// Sessions are reused LIFO. Capacity is enforced with a semaphore: every
/// live [`Lease`] owns one permit, so at most `size` sessions exist per
/// node and a caller that stops waiting for a saturated pool gives its
/// place back by dropping the acquire future.
///
/// # Example
///
/// ```rust,ignore
/// let lease = pool.acquire().await?;
/// // use the session through the lease
/// drop(lease); // session returns to the pool
/// ```
pub struct NodePool<B: Backend> {
    node: NodeSpec,
    backend: Arc<B>,
    acquire_timeout: Duration,
    shared: Arc<PoolShared<B>>,
}

impl<B: Backend> NodePool<B> {
    /// Creates an empty pool for `node` holding at most `size` sessions.
    ///
    /// # Arguments
    ///
    /// * `node` - The endpoint this pool connects to
    /// * `backend` - Driver used to open new sessions
    /// * `size` - Maximum open sessions for this node
    /// * `acquire_timeout` - How long an acquire may wait when saturated
    /// * `events` - Channel for out-of-band failure reports to the prober
    pub fn new(
        node: NodeSpec,
        backend: Arc<B>,
        size: usize,
        acquire_timeout: Duration,
        events: UnboundedSender<NodeEvent>,
    ) -> Self {
        let node_id = node.id();
        Self {
            node,
            backend,
            acquire_timeout,
            shared: Arc::new(PoolShared {
                node_id,
                limit: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(0),
                events,
            }),
        }
    }

    /// Acquires a session, reusing an idle one when possible.
    ///
    /// Blocks while the pool is saturated, bounded by the acquire timeout.
    /// Dropping the returned future while it waits releases its place in
    /// line; no capacity is lost.
    ///
    /// # Errors
    ///
    /// - [`VaneError::AcquireTimeout`] if the pool stays saturated past
    ///   the timeout
    /// - [`VaneError::NodeDown`] if opening a new session fails or does
    ///   not complete within the remaining timeout budget; the failure is
    ///   also reported to the prober out-of-band
    pub async fn acquire(&self) -> Result<Lease<B>> {
        let started = Instant::now();

        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.shared.limit).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; treat it as the node being gone.
            Ok(Err(_)) => return Err(VaneError::NodeDown(self.shared.node_id.clone())),
            Err(_) => {
                return Err(VaneError::AcquireTimeout(
                    self.acquire_timeout.as_millis() as u64,
                    self.shared.node_id.clone(),
                ))
            }
        };

        // Reuse the most recently returned session, discarding any that
        // died while parked.
        loop {
            let candidate = self.shared.idle.lock().unwrap().pop_back();
            match candidate {
                Some(session) if !session.is_closed() => {
                    return Ok(Lease::new(session, permit, Arc::clone(&self.shared)));
                }
                Some(_) => {
                    self.shared.open.fetch_sub(1, Ordering::Relaxed);
                    debug!(node = %self.shared.node_id, "discarding dead idle session");
                }
                None => break,
            }
        }

        // Nothing idle; open a new session under the permit. The connect
        // gets whatever is left of the acquire budget.
        let remaining = self.acquire_timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.backend.connect(&self.node)).await {
            Ok(Ok(session)) => {
                self.shared.open.fetch_add(1, Ordering::Relaxed);
                Ok(Lease::new(session, permit, Arc::clone(&self.shared)))
            }
            Ok(Err(err)) => {
                self.shared.report_failure(err.to_string());
                Err(VaneError::NodeDown(self.shared.node_id.clone()))
            }
            Err(_) => {
                self.shared
                    .report_failure(format!("connect timed out after {:?}", remaining));
                Err(VaneError::NodeDown(self.shared.node_id.clone()))
            }
        }
    }

    /// Closes every idle session. Leased sessions are untouched; they are
    /// discarded on release once their own `is_closed` reports true or
    /// their lease was invalidated.
    ///
    /// Returns how many sessions were closed.
    pub fn drain_idle(&self) -> usize {
        let drained: Vec<B::Session> = {
            let mut idle = self.shared.idle.lock().unwrap();
            idle.drain(..).collect()
        };
        let count = drained.len();
        if count > 0 {
            self.shared.open.fetch_sub(count, Ordering::Relaxed);
            debug!(node = %self.shared.node_id, count, "drained idle sessions");
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.shared.open.load(Ordering::Relaxed),
            idle: self.shared.idle.lock().unwrap().len(),
        }
    }

    pub fn node(&self) -> &NodeSpec {
        &self.node
    }
}

/// Exclusive hold on one pooled session.
///
/// Dropping the lease returns the session to its pool, or discards it if
/// the lease was [`invalidated`](Self::invalidate) or the session closed
/// underneath it. The capacity permit is released either way, so a slot
/// never leaks.
pub struct Lease<B: Backend> {
    session: Option<B::Session>,
    shared: Arc<PoolShared<B>>,
    poisoned: bool,
    // Released after the session is back in the idle queue: fields drop
    // in declaration order, after Drop::drop has run.
    _permit: OwnedSemaphorePermit,
}

impl<B: Backend> Lease<B> {
    fn new(session: B::Session, permit: OwnedSemaphorePermit, shared: Arc<PoolShared<B>>) -> Self {
        Self {
            session: Some(session),
            shared,
            poisoned: false,
            _permit: permit,
        }
    }

    /// The id of the node this lease is bound to.
    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    /// Marks the session as broken after a network-level failure.
    ///
    /// The session will be discarded instead of returned, and the node is
    /// reported suspect to the prober immediately rather than on the next
    /// scheduled cycle.
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        if self.poisoned {
            return;
        }
        self.poisoned = true;
        self.shared.report_failure(reason.into());
    }
}

impl<B: Backend> fmt::Debug for Lease<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("node_id", &self.shared.node_id)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Deref for Lease<B> {
    type Target = B::Session;

    fn deref(&self) -> &B::Session {
        self.session.as_ref().expect("session present until drop")
    }
}

impl<B: Backend> DerefMut for Lease<B> {
    fn deref_mut(&mut self) -> &mut B::Session {
        self.session.as_mut().expect("session present until drop")
    }
}

impl<B: Backend> Drop for Lease<B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if self.poisoned || session.is_closed() {
                self.shared.open.fetch_sub(1, Ordering::Relaxed);
                debug!(node = %self.shared.node_id, "discarding session on release");
            } else {
                self.shared.idle.lock().unwrap().push_back(session);
            }
        }
    }
}
