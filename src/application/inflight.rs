//! Single-slot in-flight tracking for expensive background work.
//!
//! At most one run exists per [`SingleFlight`]. A caller that arrives while a
//! run is in progress joins it instead of starting another, and anyone can
//! check [`SingleFlight::in_progress`] without waiting. The work is spawned so
//! it completes even if the caller that started it goes away; the slot is
//! released by a guard on every exit path, panics included.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::warn;

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "application::inflight";

#[derive(Debug, Clone, Error)]
pub enum FlightError {
    #[error("in-flight `{name}` task did not complete")]
    Aborted { name: &'static str },
}

/// Whether this caller started the run or joined one already in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Flight<T> {
    Leader(T),
    Follower(T),
}

impl<T> Flight<T> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Flight::Leader(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Flight::Leader(value) | Flight::Follower(value) => value,
        }
    }
}

type Run<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;

struct Slot<T> {
    id: u64,
    run: Run<T>,
}

pub struct SingleFlight<T> {
    name: &'static str,
    slot: Arc<Mutex<Option<Slot<T>>>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn in_progress(&self) -> bool {
        mutex_lock(&self.slot, SOURCE, "in_progress").is_some()
    }

    /// Start `make()` unless a run is already in flight, then wait for the
    /// outcome of whichever run is current.
    pub async fn run<F, Fut>(&self, make: F) -> Result<Flight<T>, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (run, leader) = {
            let mut slot = mutex_lock(&self.slot, SOURCE, "run");
            match slot.as_ref() {
                Some(current) => (current.run.clone(), false),
                None => (self.start(&mut slot, make()), true),
            }
        };

        let value = run.await?;
        Ok(if leader {
            Flight::Leader(value)
        } else {
            Flight::Follower(value)
        })
    }

    /// Start and await `make()` only when nothing is in flight. Returns `None`
    /// without waiting when another run already holds the slot.
    pub async fn lead<F, Fut>(&self, make: F) -> Option<Result<T, FlightError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let run = {
            let mut slot = mutex_lock(&self.slot, SOURCE, "lead");
            if slot.is_some() {
                return None;
            }
            self.start(&mut slot, make())
        };
        Some(run.await)
    }

    fn start<Fut>(&self, slot: &mut Option<Slot<T>>, work: Fut) -> Run<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = FlightGuard {
            id,
            slot: Arc::clone(&self.slot),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let name = self.name;
        let run = async move {
            handle.await.map_err(|err| {
                warn!(target = SOURCE, name, error = %err, "In-flight task failed");
                FlightError::Aborted { name }
            })
        }
        .boxed()
        .shared();
        *slot = Some(Slot {
            id,
            run: run.clone(),
        });
        run
    }
}

struct FlightGuard<T> {
    id: u64,
    slot: Arc<Mutex<Option<Slot<T>>>>,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        let mut slot = mutex_lock(&self.slot, SOURCE, "release");
        if slot.as_ref().is_some_and(|current| current.id == self.id) {
            *slot = None;
        }
    }
}
