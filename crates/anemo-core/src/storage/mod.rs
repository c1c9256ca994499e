//! Bucketed history: aggregation, RAM rings and the durable daily logs.

pub mod accumulator;
pub mod daily_log;
pub mod manager;
pub mod ring;
pub mod rollup;
pub mod volume;

pub use accumulator::BucketAggregator;
pub use daily_log::{DailyLog, LogName, RowWeights};
pub use manager::StorageManager;
pub use ring::{HistoryRing, RingError, Timestamped};
pub use rollup::*;
pub use volume::{FileEntry, MemoryVolume, StorageError, Volume};
