//! # Audio Module
//!
//! Per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`registry`] - Guild Sessions
//! - Creates a session on the first `/join` or `/play` of a guild
//! - Routes every command to the session of its guild
//! - Forgets sessions once they stop
//!
//! ### [`session`] - Playback Session
//! - FIFO queue, current track and volume of one guild
//! - Runs as its own task and handles one message at a time
//! - Resolves the next track in the background, cancelling on stop or skip
//!
//! ### [`sink`] - Voice Contracts
//! - Traits the session uses to connect, stream and announce
//!
//! ### [`songbird_sink`] - Songbird Backend
//! - Production implementation of the voice contracts

pub mod registry;
pub mod session;
pub mod sink;
pub mod songbird_sink;

#[cfg(test)]
mod testing;

pub use registry::GuildSessions;
pub use session::{NowPlayingInfo, SessionDeps, SessionSettings};
pub use sink::{PlaybackEvent, PlaybackNotifier};
pub use songbird_sink::SongbirdVoice;
