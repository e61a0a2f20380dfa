//! Wavreel Core - Gapped WAV concatenation and position-tracked playback
//!
//! This crate joins a folder of WAV recordings into one timeline with
//! silent gaps, indexes where each recording lies, and plays the timeline
//! while reporting which recording is under the playhead.

pub mod backend;
pub mod command;
pub mod decoder;
pub mod export;
pub mod index;
pub mod library;
pub mod output;
pub mod player;
pub mod resample;
pub mod session;
pub mod timeline;

pub use backend::{ PlaybackBackend, PlaybackError, PlaybackHandle };
pub use command::{ Command, CommandError };
pub use decoder::{ AudioSegment, SampleEncoding };
pub use index::{ PositionEntry, PositionIndex };
pub use player::{ Player, PlayerConfig, PlayerError };
pub use session::{ PlaybackSession, PlaybackState, SessionStatus };
pub use timeline::{ MergedTimeline, TimelineError };
