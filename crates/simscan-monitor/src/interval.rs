//! Per-entity interval scheduling.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, TimeDelta, Utc};

/// Tracks a finite set of queried objects and when each was last served,
/// handing out due objects in batches.
#[derive(Debug)]
pub struct IntervalScheduler<K> {
    duration: TimeDelta,
    batch_size: usize,
    offset: f64,
    last_served: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash + Clone> IntervalScheduler<K> {
    /// `offset` in `[0, 1]` controls how far into the past newly tracked
    /// objects are backdated: 0 means a fresh object first fires one full
    /// cadence after being added, 1 means the first fresh object fires
    /// immediately.
    pub fn new(duration: TimeDelta, batch_size: usize, offset: f64) -> Self {
        Self {
            duration,
            batch_size: batch_size.max(1),
            offset: offset.clamp(0.0, 1.0),
            last_served: HashMap::new(),
        }
    }

    /// Whether nothing is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.last_served.is_empty()
    }

    /// Adjust cadence and batch size, keeping the tracked timestamps.
    pub fn configure(&mut self, duration: TimeDelta, batch_size: usize) {
        self.duration = duration;
        self.batch_size = batch_size.max(1);
    }

    /// Replace the tracked set. Objects already tracked keep their
    /// last-served time; removed objects are forgotten. New objects are
    /// backdated by a decreasing share of `offset x duration` each, so they
    /// come due spread across the cadence instead of all on the first tick.
    pub fn set_queried_objects(&mut self, ids: Vec<K>, now: DateTime<Utc>) {
        let fresh_total = ids
            .iter()
            .filter(|id| !self.last_served.contains_key(id))
            .count();
        let mut next = HashMap::with_capacity(ids.len());
        let mut fresh_index = 0usize;
        for id in ids {
            if let Some(served) = self.last_served.get(&id) {
                next.insert(id, *served);
            } else {
                let fraction = (fresh_total - fresh_index) as f64 / fresh_total as f64;
                let shift_ms =
                    (self.duration.num_milliseconds() as f64 * self.offset * fraction) as i64;
                next.insert(id, now - TimeDelta::milliseconds(shift_ms));
                fresh_index += 1;
            }
        }
        self.last_served = next;
    }

    /// Up to `batch_size` objects whose cadence has elapsed, oldest first;
    /// each returned object's last-served time is advanced to `now`.
    pub fn pop_triggered(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut due: Vec<(K, DateTime<Utc>)> = self
            .last_served
            .iter()
            .filter(|(_, served)| now - **served >= self.duration)
            .map(|(id, served)| (id.clone(), *served))
            .collect();
        due.sort_by_key(|(_, served)| *served);
        due.truncate(self.batch_size);
        let triggered: Vec<K> = due.into_iter().map(|(id, _)| id).collect();
        for id in &triggered {
            self.last_served.insert(id.clone(), now);
        }
        triggered
    }
}
