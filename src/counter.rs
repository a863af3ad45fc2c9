use crate::class::ObjectClass;
use crate::crossing::CrossingEvent;
use crate::error::{Error, Result};
use crate::store::CountStore;
use crate::zone::Direction;

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type CountTable = BTreeMap<ObjectClass, ClassCounts>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub in_count: u64,
    pub out_count: u64,
}

impl ClassCounts {
    #[inline]
    pub fn total(&self) -> u64 {
        self.in_count + self.out_count
    }

    #[inline]
    fn bump(&mut self, direction: Direction) {
        match direction {
            Direction::In => self.in_count += 1,
            Direction::Out => self.out_count += 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CounterConfig {
    /// Required. Empty by default, so an unset location fails validation.
    pub location: String,
    pub flush_interval_secs: f64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            flush_interval_secs: 10.0,
        }
    }
}

impl CounterConfig {
    pub fn new<S: Into<String>>(location: S) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(Error::config("location must not be empty"));
        }

        if !self.flush_interval_secs.is_finite() || self.flush_interval_secs <= 0.0 {
            return Err(Error::config(format!(
                "flush_interval_secs must be positive, got {}",
                self.flush_interval_secs
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs_f64(self.flush_interval_secs.max(0.0))
    }
}

/// Running in/out totals of one location, periodically written to a store.
///
/// Counts live behind their own lock so events can be applied while a flush
/// is writing. At most one flush runs at a time.
pub struct CountAggregator {
    location: String,
    interval: Duration,
    store: Arc<dyn CountStore>,
    counts: Mutex<CountTable>,
    flush_lock: Mutex<()>,
    last_flush: Mutex<Instant>,
}

impl CountAggregator {
    /// Creates missing records and resumes from whatever the store holds.
    pub fn open(config: &CounterConfig, store: Arc<dyn CountStore>) -> Result<Self> {
        Self::open_at(config, store, Instant::now())
    }

    pub fn open_at(
        config: &CounterConfig,
        store: Arc<dyn CountStore>,
        now: Instant,
    ) -> Result<Self> {
        config.validate()?;

        for class in ObjectClass::ALL {
            store.ensure_record(&config.location, class)?;
        }

        let stored = store.read_counts(&config.location)?;
        let mut counts: CountTable = ObjectClass::ALL
            .iter()
            .map(|c| (*c, ClassCounts::default()))
            .collect();

        for (class, c) in stored {
            counts.insert(class, c);
        }

        info!(
            location = %config.location,
            total = counts.values().map(ClassCounts::total).sum::<u64>(),
            "counts resumed"
        );

        Ok(Self {
            location: config.location.clone(),
            interval: config.flush_interval(),
            store,
            counts: Mutex::new(counts),
            flush_lock: Mutex::new(()),
            last_flush: Mutex::new(now),
        })
    }

    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn apply(&self, events: &[CrossingEvent]) {
        if events.is_empty() {
            return;
        }

        let mut counts = self.counts.lock();
        for e in events {
            counts.entry(e.class).or_default().bump(e.direction);
        }
    }

    pub fn get(&self, class: ObjectClass) -> ClassCounts {
        self.counts.lock().get(&class).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> CountTable {
        self.counts.lock().clone()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(*self.last_flush.lock()) >= self.interval
    }

    /// Writes the counts if the flush interval elapsed since the last attempt.
    ///
    /// Returns `Ok(false)` when nothing was due or another flush holds the lock.
    /// A failed write keeps the counts and is retried on the next interval.
    pub fn maybe_flush_at(&self, now: Instant) -> Result<bool> {
        if !self.is_due(now) {
            return Ok(false);
        }

        let _guard = match self.flush_lock.try_lock() {
            Some(guard) => guard,
            None => return Ok(false),
        };

        {
            let mut last = self.last_flush.lock();
            if now.saturating_duration_since(*last) < self.interval {
                return Ok(false);
            }
            *last = now;
        }

        self.write()?;
        Ok(true)
    }

    /// Unconditional flush, waits for one already in progress.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        *self.last_flush.lock() = Instant::now();

        self.write()
    }

    fn write(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let timestamp = chrono::Local::now().naive_local();

        match self.store.write_counts(&self.location, &snapshot, timestamp) {
            Ok(()) => {
                debug!(location = %self.location, "counts flushed");
                Ok(())
            }
            Err(err) => {
                warn!(location = %self.location, %err, "flush failed, counts kept in memory");
                Err(err)
            }
        }
    }
}
