use crate::counter::CountTable;
use crate::error::{Error, Result};
use crate::frame::FrameInput;
use crate::pipeline::{FrameOutput, Pipeline};

use crossbeam_channel::{bounded, Sender};
use serde_derive::Serialize;
use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

pub const DEFAULT_QUEUE_SIZE: usize = 120;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub location: String,
    pub frames: u64,
    pub dropped: u64,
    pub tracks_created: u64,
    pub counts: CountTable,
}

/// Frame queue of a stream worker. Dropping it or calling [`StreamHandle::join`]
/// closes the queue; queued frames are still processed before the final flush.
pub struct StreamHandle {
    location: String,
    sender: Sender<FrameInput>,
    handle: JoinHandle<Result<StreamSummary>>,
}

impl StreamHandle {
    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn send(&self, input: FrameInput) -> Result<()> {
        self.sender
            .send(input)
            .map_err(|_| Error::Stream(format!("worker of `{}` has stopped", self.location)))
    }

    pub fn join(self) -> Result<StreamSummary> {
        let StreamHandle {
            location,
            sender,
            handle,
        } = self;

        drop(sender);

        handle
            .join()
            .map_err(|_| Error::WorkerPanicked(format!("stream `{}`", location)))?
    }
}

pub fn spawn_stream(pipeline: Pipeline, queue_size: usize) -> Result<StreamHandle> {
    spawn_stream_with(pipeline, queue_size, |_| ())
}

/// Runs `pipeline` on its own thread; `on_frame` sees every frame output.
pub fn spawn_stream_with<F>(
    mut pipeline: Pipeline,
    queue_size: usize,
    mut on_frame: F,
) -> Result<StreamHandle>
where
    F: FnMut(&FrameOutput) + Send + 'static,
{
    let location = pipeline.aggregator().location().to_string();
    let (sender, receiver) = bounded::<FrameInput>(queue_size.max(1));

    let name = location.clone();
    let handle = thread::Builder::new()
        .name(format!("stream-{}", location))
        .spawn(move || {
            info!(location = %name, "stream started");

            while let Ok(input) = receiver.recv() {
                let out = pipeline.process(input);

                if let Some(err) = &out.flush_error {
                    warn!(location = %name, frame = out.frame, %err, "flush failed");
                }

                on_frame(&out);
            }

            let frames = pipeline.frames();
            let dropped = pipeline.dropped();
            let tracks_created = pipeline.tracker().total_created();
            let counts = pipeline.finish()?;

            info!(location = %name, frames, dropped, "stream finished");

            Ok(StreamSummary {
                location: name,
                frames,
                dropped,
                tracks_created,
                counts,
            })
        })?;

    Ok(StreamHandle {
        location,
        sender,
        handle,
    })
}

/// Each location has exactly one aggregator; two streams counting into the
/// same location would overwrite each other's flushes.
pub fn check_unique_locations<'a, L>(locations: L) -> Result<()>
where
    L: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();

    for location in locations {
        if !seen.insert(location) {
            return Err(Error::config(format!(
                "location `{}` is used by more than one stream",
                location
            )));
        }
    }

    Ok(())
}

/// Feeds every stream from its own thread and waits for all of them.
/// Results keep the order of `streams`. Nothing runs if two streams share a location.
pub fn run_streams<I>(
    streams: Vec<(Pipeline, I)>,
    queue_size: usize,
) -> Result<Vec<Result<StreamSummary>>>
where
    I: IntoIterator<Item = FrameInput> + Send,
{
    check_unique_locations(streams.iter().map(|(p, _)| p.aggregator().location()))?;

    let results = thread::scope(|s| {
        let feeders: Vec<_> = streams
            .into_iter()
            .map(|(pipeline, inputs)| {
                s.spawn(move || {
                    let handle = spawn_stream(pipeline, queue_size)?;

                    for input in inputs {
                        if handle.send(input).is_err() {
                            break;
                        }
                    }

                    handle.join()
                })
            })
            .collect();

        feeders
            .into_iter()
            .map(|f| {
                f.join()
                    .map_err(|_| Error::WorkerPanicked(String::from("stream feeder")))
                    .and_then(|res| res)
            })
            .collect()
    });

    Ok(results)
}
