//! Routing Hub
//!
//! Wires buffers and channels into a directed routing graph and tears the
//! graph down in a fixed order.
//!
//! # Architecture
//!
//! ```text
//!   producers ──▶ ┌──────────────┐    ┌─────────────┐  destination  ┌──────────────┐
//!                 │ ingress      │───▶│ [router]    │──────────────▶│ entry point  │
//!                 │ Buffer       │    │             │               └──────────────┘
//!                 └──────────────┘    │             │  miss / none  ┌──────────────┐
//!                                     │             │──fallback()──▶│ fallback     │
//!                                     └─────────────┘               └──────────────┘
//!
//!   route.from ──▶ [forwarder] ──▶ route.to          (one thread per route)
//! ```
//!
//! # Lifecycle
//!
//! 1. Register routes, entry points and the fallback
//! 2. `init()` freezes the graph and returns the ingress sender
//! 3. Producers send, then close their endpoints
//! 4. `cleanup()` waits for every thread, tears down the ingress buffer, and
//!    closes each destination once with the fallback last

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;
use thiserror::Error;

use crate::buffer::Buffer;
use crate::cleanup::{close_destinations, TaskError, TaskGroup};
use crate::endpoint::{EndpointId, Receiver, Sender};
use crate::message::{Destination, Routable};

/// Default capacity of the ingress endpoints
pub const DEFAULT_INGRESS_CAPACITY: usize = 1;

// ============================================================================
// Errors & Configuration
// ============================================================================

/// Errors from hub registration and startup
#[derive(Debug, Error)]
pub enum HubError {
    /// A route reading from this endpoint already exists
    #[error("ambiguous connection: a route from {from} is already registered")]
    AmbiguousConnection {
        /// Source endpoint of the rejected route
        from: EndpointId,
    },

    /// This endpoint is already an entry point
    #[error("entry point {id} is already registered")]
    DuplicateEntryPoint {
        /// The repeated endpoint
        id: EndpointId,
    },

    /// The routing graph is frozen once the hub has started
    #[error("hub already started; the routing graph can no longer change")]
    AlreadyStarted,

    /// A background thread could not be started
    #[error(transparent)]
    Spawn(#[from] TaskError),
}

/// Hub tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the ingress buffer's endpoints (0 = rendezvous)
    pub ingress_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters updated by the hub's threads
#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    fallback: AtomicU64,
    diagnostics: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            routed: self.routed.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            diagnostics: self.diagnostics.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of routing activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Messages delivered unchanged to a matching entry point
    pub routed: u64,
    /// Messages transformed and sent to the fallback
    pub fallback: u64,
    /// Unrecognized payloads turned into diagnostics
    pub diagnostics: u64,
    /// Messages relayed along static routes
    pub forwarded: u64,
    /// Messages lost because their destination was closed, or left unrouted
    /// when the router stopped early
    pub dropped: u64,
}

/// What `cleanup` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Endpoints closed by cleanup, in closing order (fallback last)
    pub closed: Vec<EndpointId>,
    /// Endpoints that were already closed when cleanup reached them
    pub already_closed: Vec<EndpointId>,
    /// Final routing statistics
    pub stats: HubStats,
}

// ============================================================================
// Hub
// ============================================================================

struct Route<M> {
    from: Receiver<M>,
    to: Sender<M>,
}

/// Lifecycle of the routing threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registering,
    Running,
    /// A thread failed to start; the hub cannot be started again
    Failed,
}

/// Message router with static routes, entry points and a fallback
pub struct Hub<M: Routable> {
    routes: HashMap<EndpointId, Route<M>>,
    entry_points: Vec<Sender<M>>,
    fallback: Arc<RwLock<Sender<M>>>,
    ingress: Buffer<M>,
    /// Hub-side handle on the ingress output, drained during cleanup
    ingress_out: Option<Receiver<M>>,
    config: HubConfig,
    tasks: TaskGroup,
    phase: Phase,
    stats: Arc<Counters>,
}

impl<M: Routable> Hub<M> {
    /// Create a hub whose unmatched traffic goes to `fallback`
    #[must_use]
    pub fn new(fallback: Sender<M>) -> Self {
        Self::with_config(fallback, &HubConfig::default())
    }

    /// Create a hub with explicit tuning
    #[must_use]
    pub fn with_config(fallback: Sender<M>, config: &HubConfig) -> Self {
        Self {
            routes: HashMap::new(),
            entry_points: Vec::new(),
            fallback: Arc::new(RwLock::new(fallback)),
            ingress: Buffer::new(),
            ingress_out: None,
            config: *config,
            tasks: TaskGroup::new(),
            phase: Phase::Registering,
            stats: Arc::new(Counters::default()),
        }
    }

    /// Relay everything received on `from` to `to`
    ///
    /// # Errors
    ///
    /// [`HubError::AmbiguousConnection`] if `from` already feeds a route,
    /// [`HubError::AlreadyStarted`] after `init`. The hub is unchanged on
    /// error.
    pub fn add_connection(&mut self, from: Receiver<M>, to: Sender<M>) -> Result<(), HubError> {
        if self.is_started() {
            return Err(HubError::AlreadyStarted);
        }
        let from_id = from.id();
        if self.routes.contains_key(&from_id) {
            tracing::warn!(from = %from_id, "Rejected ambiguous connection");
            return Err(HubError::AmbiguousConnection { from: from_id });
        }

        tracing::debug!(from = %from_id, to = %to.id(), "Route added");
        self.routes.insert(from_id, Route { from, to });
        Ok(())
    }

    /// Accept messages addressed to `to`
    ///
    /// # Errors
    ///
    /// [`HubError::DuplicateEntryPoint`] if `to` is already registered,
    /// [`HubError::AlreadyStarted`] after `init`.
    pub fn add_entry_point(&mut self, to: Sender<M>) -> Result<(), HubError> {
        if self.is_started() {
            return Err(HubError::AlreadyStarted);
        }
        if self.entry_points.iter().any(|entry| entry.id() == to.id()) {
            return Err(HubError::DuplicateEntryPoint { id: to.id() });
        }

        tracing::debug!(entry_point = %to.id(), "Entry point added");
        self.entry_points.push(to);
        Ok(())
    }

    /// Replace the fallback. Takes effect immediately, even while running.
    ///
    /// The previous fallback is not closed by this hub anymore unless it is
    /// also a route destination or an entry point.
    pub fn set_fallback(&mut self, to: Sender<M>) {
        let mut fallback = self.fallback.write();
        tracing::debug!(old = %fallback.id(), new = %to.id(), "Fallback replaced");
        *fallback = to;
    }

    /// Start routing and return the ingress sender
    ///
    /// The first call spawns the ingress buffer, the router and one forwarder
    /// per route. Later calls only hand out the ingress sender again.
    ///
    /// # Errors
    ///
    /// [`HubError::Spawn`] if a thread cannot be started, and
    /// `HubError::Spawn(TaskError::Defunct)` on every call after that.
    pub fn init(&mut self) -> Result<Sender<M>, HubError> {
        match self.phase {
            Phase::Failed => return Err(TaskError::Defunct.into()),
            Phase::Running => {
                let (ingress, _) = self.ingress.init(self.config.ingress_capacity)?;
                return Ok(ingress);
            }
            Phase::Registering => {}
        }

        // Frozen from here on; only a complete start counts as running.
        self.phase = Phase::Failed;
        let (ingress, outbound) = self.ingress.init(self.config.ingress_capacity)?;
        self.ingress_out = Some(outbound.clone());
        self.start(outbound)?;
        self.phase = Phase::Running;

        tracing::info!(
            ingress = %ingress.id(),
            routes = self.routes.len(),
            entry_points = self.entry_points.len(),
            fallback = %self.fallback_id(),
            "Hub started"
        );
        Ok(ingress)
    }

    fn start(&self, outbound: Receiver<M>) -> Result<(), TaskError> {
        for route in self.routes.values() {
            let from = route.from.clone();
            let to = route.to.clone();
            let stats = Arc::clone(&self.stats);
            self.tasks
                .spawn(format!("relay-forward-{}", from.id()), move || {
                    forward(&from, &to, &stats);
                })?;
        }

        let router = Router {
            entry_points: self.entry_points.clone(),
            fallback: Arc::clone(&self.fallback),
            stats: Arc::clone(&self.stats),
        };
        self.tasks.spawn("relay-router", move || router.run(&outbound))
    }

    /// Tear the hub down
    ///
    /// Blocks until every producer has closed: the ingress sender and each
    /// route's source. Then closes each destination exactly once, the
    /// fallback last, while the ingress buffer finishes in parallel.
    ///
    /// Anything the router left behind on the ingress output (because it
    /// died or never started) is discarded and counted as dropped, so the
    /// ingress buffer can always finish.
    pub fn cleanup(mut self) -> CleanupReport {
        tracing::debug!("Hub cleanup waiting for routing threads");
        self.tasks.wait();

        let fallback = self.fallback.read().clone();
        let destinations = self
            .routes
            .values()
            .map(|route| route.to.clone())
            .chain(self.entry_points.iter().cloned());

        let ingress = &self.ingress;
        let ingress_out = self.ingress_out.take();
        let stats = &self.stats;
        let outcome = thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(stranded) = ingress_out {
                    discard_stranded(&stranded, stats);
                }
                ingress.wait();
            });
            close_destinations(destinations, &fallback)
        });

        let report = CleanupReport {
            closed: outcome.closed,
            already_closed: outcome.already_closed,
            stats: self.stats.snapshot(),
        };
        tracing::info!(
            closed = report.closed.len(),
            already_closed = report.already_closed.len(),
            routed = report.stats.routed,
            fallback = report.stats.fallback,
            dropped = report.stats.dropped,
            "Hub cleaned up"
        );
        report
    }

    /// Current routing statistics
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.stats.snapshot()
    }

    /// Registered routes as `(from, to)` pairs, ordered by source
    #[must_use]
    pub fn routes(&self) -> Vec<(EndpointId, EndpointId)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|(from, route)| (*from, route.to.id()))
            .collect();
        routes.sort_unstable();
        routes
    }

    /// Entry point ids in registration order
    #[must_use]
    pub fn entry_points(&self) -> Vec<EndpointId> {
        self.entry_points.iter().map(Sender::id).collect()
    }

    /// Id of the current fallback
    #[must_use]
    pub fn fallback_id(&self) -> EndpointId {
        self.fallback.read().id()
    }

    /// Whether `init` has been called
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.phase != Phase::Registering
    }
}

impl<M: Routable> std::fmt::Debug for Hub<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("routes", &self.routes())
            .field("entry_points", &self.entry_points())
            .field("fallback", &self.fallback_id())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Routing threads
// ============================================================================

/// State owned by the router thread
struct Router<M> {
    entry_points: Vec<Sender<M>>,
    fallback: Arc<RwLock<Sender<M>>>,
    stats: Arc<Counters>,
}

impl<M: Routable> Router<M> {
    fn run(&self, ingress: &Receiver<M>) {
        for message in ingress.iter() {
            self.dispatch(message);
        }
        tracing::debug!(ingress = %ingress.id(), "Router finished");
    }

    fn dispatch(&self, message: M) {
        match message.destination() {
            Destination::Unrecognized(reason) => {
                Counters::bump(&self.stats.diagnostics);
                tracing::warn!(reason = %reason, "Unrecognized message");
                let diagnostic = M::diagnostic(reason);
                match diagnostic.destination() {
                    Destination::Unrecognized(_) => self.send_fallback(diagnostic),
                    destination => self.route(diagnostic, &destination),
                }
            }
            destination => self.route(message, &destination),
        }
    }

    fn route(&self, message: M, destination: &Destination) {
        if let Destination::Endpoint(id) = destination {
            if let Some(entry) = self.entry_points.iter().find(|entry| entry.id() == *id) {
                Counters::bump(&self.stats.routed);
                self.deliver(entry, message);
                return;
            }
            tracing::debug!(to = %id, "No entry point; using fallback");
        }
        Counters::bump(&self.stats.fallback);
        self.send_fallback(message.fallback());
    }

    fn send_fallback(&self, message: M) {
        // Cloned so a slow fallback never blocks `set_fallback`.
        let fallback = self.fallback.read().clone();
        self.deliver(&fallback, message);
    }

    fn deliver(&self, to: &Sender<M>, message: M) {
        if to.send(message).is_err() {
            Counters::bump(&self.stats.dropped);
            tracing::warn!(to = %to.id(), "Destination closed; message dropped");
        }
    }
}

/// Empty the ingress output once no router is reading it
fn discard_stranded<M>(outbound: &Receiver<M>, stats: &Counters) {
    let mut discarded = 0_u64;
    for _message in outbound.iter() {
        Counters::bump(&stats.dropped);
        discarded += 1;
    }
    if discarded > 0 {
        tracing::warn!(
            ingress = %outbound.id(),
            discarded,
            "Router stopped early; discarded unrouted messages"
        );
    }
}

/// Relay one static route until its source closes
fn forward<M>(from: &Receiver<M>, to: &Sender<M>, stats: &Counters) {
    for message in from.iter() {
        if to.send(message).is_ok() {
            Counters::bump(&stats.forwarded);
        } else {
            Counters::bump(&stats.dropped);
            tracing::warn!(from = %from.id(), to = %to.id(), "Route destination closed; message dropped");
        }
    }
    tracing::debug!(from = %from.id(), "Route finished");
}
