pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod fixtures;
pub mod identify;
pub mod segment;
pub mod session;
pub mod wav;

pub use buffer::{Buffer, BufferId, BufferPool};
pub use config::AppConfig;
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_with_config};
pub use identify::{DEFAULT_MATCH_THRESHOLD, IdentifyOptions, Match, find_matches, format_matches};
pub use segment::{Segment, SegmentId, SegmentPool};
pub use session::{EditError, Session, SessionStats, TrackId};
