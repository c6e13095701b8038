//! Live conversation synchronization.
//!
//! - `entry`: Transcript entry model and dedup identity
//! - `classifier`: Raw channel frame classification
//! - `merge`: Snapshot/channel/local transcript merge
//! - `statistics`: Partial statistics folding
//! - `takeover`: Supervisor takeover state machine
//! - `channel`: WebSocket transport for one conversation
//! - `session`: Reducer combining all of the above for one open conversation
//! - `error`: Session action errors

pub mod channel;
pub mod classifier;
pub mod entry;
pub mod error;
pub mod merge;
pub mod session;
pub mod statistics;
pub mod takeover;

pub use channel::{ChannelEvent, ChannelState, LiveChannel, build_channel_url};
pub use classifier::{ClassifiedFrame, classify};
pub use entry::{CreateTime, TranscriptEntry};
pub use error::{LiveError, LiveResult};
pub use merge::{MergeOutcome, merge};
pub use session::{LiveSession, SessionView};
pub use statistics::{ConversationStatistics, Sentiment, StatisticsUpdate, fold};
pub use takeover::{TakeoverMachine, TakeoverOrigin, TakeoverState};
