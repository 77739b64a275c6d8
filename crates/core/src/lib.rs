//! Forge core: the real-time mastering chain and everything that drives it.
//!
//! The crate is split in two halves that meet over a channel:
//! - the audio-thread side ([`domain::engine::MasteringEngine`]) owns the
//!   signal chain, the playing sources and all parameter smoothing;
//! - the control side ([`domain::session::MasteringSession`]) owns the
//!   parameter set, the transport state machine and the analysis state.

pub mod domain;
