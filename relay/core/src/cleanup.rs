//! Shutdown Choreography
//!
//! Shared by [`Buffer`](crate::buffer::Buffer) and [`Hub`](crate::hub::Hub):
//!
//! - [`TaskGroup`] tracks the OS threads a component owns and lets any number
//!   of callers block until all of them have exited.
//! - [`close_destinations`] closes a set of endpoints exactly once each, with
//!   the fallback endpoint strictly last.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::endpoint::{EndpointError, EndpointId, Sender};

/// Errors starting background tasks
#[derive(Debug, Error)]
pub enum TaskError {
    /// The OS refused to start a thread
    #[error("failed to spawn task {name}: {source}")]
    Spawn {
        /// Name of the task that could not start
        name: String,
        /// The underlying IO error
        source: io::Error,
    },

    /// An earlier start attempt failed; the component cannot be restarted
    #[error("component failed to start earlier and cannot be initialized again")]
    Defunct,
}

#[derive(Default)]
struct LiveCount {
    live: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the live count when the task ends, even by unwinding
struct LiveGuard(Arc<LiveCount>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.0.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// A set of named OS threads that can be awaited as a unit
#[derive(Default)]
pub struct TaskGroup {
    count: Arc<LiveCount>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    /// Create an empty group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` on a new thread called `name`
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Spawn`] if the thread cannot be created. The task
    /// is dropped without running in that case.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F) -> Result<(), TaskError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        *self.count.live.lock() += 1;
        let guard = LiveGuard(Arc::clone(&self.count));

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                task();
            })
            .map_err(|source| TaskError::Spawn {
                name: name.clone(),
                source,
            })?;

        tracing::debug!(task = %name, "Task started");
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Number of tasks that have not finished yet
    #[must_use]
    pub fn live(&self) -> usize {
        *self.count.live.lock()
    }

    /// Block until every task in the group has exited
    ///
    /// Safe to call repeatedly and from several threads at once.
    pub fn wait(&self) {
        {
            let mut live = self.count.live.lock();
            while *live > 0 {
                self.count.idle.wait(&mut live);
            }
        }

        let finished: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in finished {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                tracing::warn!(task = %name, "Task panicked before exiting");
            }
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}

/// Outcome of closing a hub's destinations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedEndpoints {
    /// Endpoints closed by this call, in closing order (fallback last)
    pub closed: Vec<EndpointId>,
    /// Endpoints that someone else had already closed
    pub already_closed: Vec<EndpointId>,
}

impl ClosedEndpoints {
    fn record(&mut self, id: EndpointId, result: Result<(), EndpointError>) {
        match result {
            Ok(()) => self.closed.push(id),
            Err(EndpointError::AlreadyClosed { .. }) => {
                tracing::warn!(endpoint = %id, "Destination was already closed");
                self.already_closed.push(id);
            }
        }
    }
}

/// Close every distinct destination once, then the fallback
///
/// Destinations are deduplicated by id and the fallback is removed from the
/// set even if it was also registered as a destination. The remaining
/// endpoints are closed in id order.
pub fn close_destinations<T>(
    destinations: impl IntoIterator<Item = Sender<T>>,
    fallback: &Sender<T>,
) -> ClosedEndpoints {
    let mut distinct: BTreeMap<EndpointId, Sender<T>> = destinations
        .into_iter()
        .map(|sender| (sender.id(), sender))
        .collect();
    distinct.remove(&fallback.id());

    let mut outcome = ClosedEndpoints::default();
    for (id, sender) in distinct {
        outcome.record(id, sender.close());
    }
    outcome.record(fallback.id(), fallback.close());
    outcome
}
