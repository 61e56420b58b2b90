//! Live Tail Broadcaster
//!
//! Turns the pull-based record store into a push feed: every tick the newest
//! records for one sensor are re-queried and pushed as a whole batch. A slow
//! client simply sees fewer ticks; nothing is queued.

mod sink;
mod tail;

pub use sink::{latest_channel, BatchSink, LatestSink, SinkError, TailReceiver};
pub use tail::{LiveTail, LiveTailConfig, TailEnd};
