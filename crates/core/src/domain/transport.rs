//! Transport controller
//!
//! A pure state machine over {Idle, Playing, Paused}. Time is passed in by the
//! caller (seconds on the engine clock), and every transition returns the
//! action the render engine must perform. The primary source and both noise
//! loops are started and stopped by the same action, so they can never drift
//! apart.

use crate::domain::audio::{AudioError, Result};
use tracing::{debug, info};

/// Default slack when deciding whether a finished source reached its end
pub const DEFAULT_END_TOLERANCE_SECS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Playing,
    Paused,
}

/// Work for the render engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportAction {
    /// Start the source at `offset_secs` and both noise loops at 0
    Start { offset_secs: f64, generation: u64 },
    /// Halt the source and both noise loops
    Stop { generation: u64 },
}

#[derive(Debug, Clone)]
pub struct Transport {
    state: TransportState,
    duration_secs: Option<f64>,
    start_time: f64,
    pause_offset: f64,
    generation: u64,
    end_tolerance_secs: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_END_TOLERANCE_SECS)
    }
}

impl Transport {
    pub fn new(end_tolerance_secs: f64) -> Self {
        Self {
            state: TransportState::Idle,
            duration_secs: None,
            start_time: 0.0,
            pause_offset: 0.0,
            generation: 0,
            end_tolerance_secs: end_tolerance_secs.max(0.0),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Generation of the most recent start
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Offset stored at the last pause (0 after a load or natural end)
    pub fn pause_offset(&self) -> f64 {
        self.pause_offset
    }

    /// Install a new source; any playback stops and the offset resets
    pub fn load(&mut self, duration_secs: f64) -> Option<TransportAction> {
        let stop = self.halt();
        self.duration_secs = Some(duration_secs.max(0.0));
        self.pause_offset = 0.0;
        self.state = TransportState::Idle;
        info!(duration_secs, "Source loaded into transport");
        stop
    }

    /// Idle/Paused -> Playing
    ///
    /// Returns `Ok(None)` if already playing.
    pub fn play(&mut self, now: f64) -> Result<Option<TransportAction>> {
        let duration = self.duration_secs.ok_or(AudioError::NoSource)?;
        if self.is_playing() {
            return Ok(None);
        }

        let offset_secs = if duration > 0.0 {
            self.pause_offset.rem_euclid(duration)
        } else {
            0.0
        };
        self.start_time = now - offset_secs;
        self.generation += 1;
        self.state = TransportState::Playing;

        info!(offset_secs, generation = self.generation, "Playback started");
        Ok(Some(TransportAction::Start {
            offset_secs,
            generation: self.generation,
        }))
    }

    /// Playing -> Paused, recording the elapsed offset
    pub fn pause(&mut self, now: f64) -> Option<TransportAction> {
        if !self.is_playing() {
            return None;
        }
        self.pause_offset = (now - self.start_time).max(0.0);
        self.state = TransportState::Paused;
        info!(offset_secs = self.pause_offset, "Playback paused");
        Some(TransportAction::Stop {
            generation: self.generation,
        })
    }

    pub fn toggle(&mut self, now: f64) -> Result<Option<TransportAction>> {
        if self.is_playing() {
            Ok(self.pause(now))
        } else {
            self.play(now)
        }
    }

    /// The engine reports that the source of play `generation` ran out
    ///
    /// Honoured only for the current play and only when the elapsed time has
    /// reached the duration (within tolerance). Playing -> Idle, offset 0.
    pub fn on_source_ended(&mut self, generation: u64, now: f64) -> Option<TransportAction> {
        if !self.is_playing() || generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale end event");
            return None;
        }
        let duration = self.duration_secs?;
        if now - self.start_time < duration - self.end_tolerance_secs {
            return None;
        }

        self.state = TransportState::Idle;
        self.pause_offset = 0.0;
        info!(generation, "Playback reached end of source");
        Some(TransportAction::Stop { generation })
    }

    /// Current position in seconds
    pub fn position(&self, now: f64) -> f64 {
        match self.state {
            TransportState::Playing => {
                let elapsed = now - self.start_time;
                self.duration_secs.map_or(elapsed, |d| elapsed.min(d))
            }
            TransportState::Paused | TransportState::Idle => self.pause_offset,
        }
    }

    /// Stop playing without recording an offset
    fn halt(&mut self) -> Option<TransportAction> {
        if self.is_playing() {
            self.state = TransportState::Idle;
            Some(TransportAction::Stop {
                generation: self.generation,
            })
        } else {
            None
        }
    }
}
