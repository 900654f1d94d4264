//! Client side: feed polling with incremental rendering, and streamed-answer
//! reconstruction.

pub mod consumer;
pub mod http;
pub mod join;
pub mod reconstruct;

pub use consumer::{FeatureLayer, MemoryLayer, Overlay, OverlaySession, PollOutcome, SeenIdSet};
pub use http::{ask, stream_ask, FeedSource, HttpFeedSource};
pub use join::join;
pub use reconstruct::{
    NullView, RecordingView, ResultView, SessionState, StreamFailure, StreamReconstructor,
    StreamSession,
};
