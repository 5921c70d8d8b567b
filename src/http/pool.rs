//! Connection accounting for the shared client.
//!
//! # Responsibilities
//! - Bound connections in use, in total and per destination
//! - Bound the time a request waits for a free connection
//! - Hand out a lease that returns the connection exactly once
//!
//! # Design Decisions
//! - Semaphores rather than counters so waiters queue fairly
//! - A destination is route + target authority; proxied and direct traffic to
//!   the same origin are accounted separately
//! - The lease is an RAII guard owned by the response
//! - A destination's semaphore lives only while something holds or awaits it;
//!   the last lease out removes it so one-off hosts do not accumulate

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

static LEASE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

type DestinationSlots = Arc<DashMap<String, Arc<Semaphore>>>;

/// Drop the semaphore for `destination` once nobody holds or awaits it.
///
/// The map's shard lock is held across the check, so a concurrent `acquire`
/// either clones the semaphore first (count > 1, kept) or inserts a new one.
fn prune(slots: &DashMap<String, Arc<Semaphore>>, destination: &str, limit: usize) {
    slots.remove_if(destination, |_, slot| {
        Arc::strong_count(slot) == 1 && slot.available_permits() == limit
    });
}

#[derive(Debug)]
pub struct ConnectionLimiter {
    total: Arc<Semaphore>,
    per_destination: DestinationSlots,
    per_destination_limit: usize,
    acquire_timeout: Option<Duration>,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize, max_per_destination: usize, acquire_timeout: Option<Duration>) -> Self {
        Self {
            total: Arc::new(Semaphore::new(max_total)),
            per_destination: Arc::new(DashMap::new()),
            per_destination_limit: max_per_destination,
            acquire_timeout,
        }
    }

    /// Wait for a free connection slot towards `destination`.
    ///
    /// Returns `None` when the acquisition timeout elapses first.
    pub async fn acquire(&self, destination: &str) -> Option<ConnectionLease> {
        let start = Instant::now();
        let route_slots = self
            .per_destination
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_destination_limit)))
            .clone();
        let total = self.total.clone();

        let acquire = async move {
            let route_permit = route_slots.acquire_owned().await.ok()?;
            let total_permit = total.acquire_owned().await.ok()?;
            Some((route_permit, total_permit))
        };

        let permits = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.ok().flatten(),
            None => acquire.await,
        };
        metrics::record_pool_wait(start);

        let Some((route_permit, total_permit)) = permits else {
            prune(&self.per_destination, destination, self.per_destination_limit);
            return None;
        };
        let lease = ConnectionLease {
            id: LEASE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            destination: destination.to_string(),
            route_permit: Some(route_permit),
            _total_permit: total_permit,
            slots: self.per_destination.clone(),
            slot_limit: self.per_destination_limit,
        };
        metrics::connection_leased();
        tracing::trace!(lease = lease.id, destination = %lease.destination, "Connection leased");
        Some(lease)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    /// Free slots across all destinations.
    pub fn available(&self) -> usize {
        self.total.available_permits()
    }

    /// Destinations with a lease out or a request waiting.
    pub fn destination_count(&self) -> usize {
        self.per_destination.len()
    }
}

/// A borrowed connection slot. Dropping it returns the slot.
#[derive(Debug)]
pub struct ConnectionLease {
    id: u64,
    destination: String,
    route_permit: Option<OwnedSemaphorePermit>,
    _total_permit: OwnedSemaphorePermit,
    slots: DestinationSlots,
    slot_limit: usize,
}

impl ConnectionLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        // The permit keeps the semaphore alive; release it before pruning.
        drop(self.route_permit.take());
        prune(&self.slots, &self.destination, self.slot_limit);
        metrics::connection_released();
        tracing::trace!(lease = self.id, destination = %self.destination, "Connection released");
    }
}
