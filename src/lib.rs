pub mod bbox;
pub mod class;
pub mod config;
pub mod counter;
pub mod crossing;
pub mod detection;
pub mod error;
pub mod flusher;
pub mod fps;
pub mod frame;
pub mod matching;
pub mod pipeline;
pub mod runtime;
pub mod store;
pub mod tracker;
pub mod zone;

mod history;
mod track;

pub use class::{ClassMap, ObjectClass};
pub use counter::{ClassCounts, CountAggregator, CountTable, CounterConfig};
pub use crossing::{CrossingDetector, CrossingEvent};
pub use detection::Detection;
pub use error::{Error, Result};
pub use frame::{Frame, FrameInput};
pub use history::{TrackHistory, TrackSample};
pub use pipeline::{FlushMode, FrameOutput, Pipeline};
pub use store::{CountStore, MemoryStore, SqliteStore};
pub use track::{Track, TrackId, TrackSnapshot, TrackState};
pub use tracker::{Tracker, TrackerConfig};
pub use zone::{Anchor, Direction, InDirection, Zone};
