use crate::counter::CountAggregator;
use crate::error::{Error, Result};

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Periodic flush of one aggregator on its own thread, so frame processing
/// never waits on storage.
pub struct Flusher {
    location: String,
    shutdown: Sender<()>,
    last_error: Arc<Mutex<Option<String>>>,
    handle: JoinHandle<Result<()>>,
}

impl Flusher {
    pub fn spawn(aggregator: Arc<CountAggregator>) -> Result<Self> {
        Self::spawn_with_period(aggregator.clone(), aggregator.interval())
    }

    pub fn spawn_with_period(aggregator: Arc<CountAggregator>, period: Duration) -> Result<Self> {
        let (shutdown, stop) = bounded::<()>(1);
        let location = aggregator.location().to_string();
        let last_error = Arc::new(Mutex::new(None));
        let errors = last_error.clone();

        let handle = thread::Builder::new()
            .name(format!("flush-{}", location))
            .spawn(move || {
                let ticker = tick(period);

                loop {
                    select! {
                        recv(ticker) -> _ => {
                            // a failure is kept until read or until a later flush succeeds
                            *errors.lock() = aggregator.flush().err().map(|e| e.to_string());
                        }
                        recv(stop) -> _ => break,
                    }
                }

                aggregator.flush()
            })?;

        info!(%location, ?period, "flusher started");

        Ok(Self {
            location,
            shutdown,
            last_error,
            handle,
        })
    }

    /// Error of the most recent periodic flush, if it failed and was not read yet.
    pub fn take_error(&self) -> Option<String> {
        self.last_error.lock().take()
    }

    /// Stops the worker after one final flush and returns its result.
    pub fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());

        let res = self
            .handle
            .join()
            .map_err(|_| Error::WorkerPanicked(format!("flusher of `{}`", self.location)))?;

        match &res {
            Ok(()) => info!(location = %self.location, "flusher stopped"),
            Err(err) => warn!(location = %self.location, %err, "final flush failed"),
        }

        res
    }
}
