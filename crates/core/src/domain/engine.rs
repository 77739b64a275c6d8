//! Real-time render engine
//!
//! [`MasteringEngine`] lives on the audio thread. It owns the signal chain,
//! the loaded source and the noise loop cursors, and is driven by commands
//! from the control side ([`EngineHandle`]) over a crossbeam channel. Nothing
//! in [`MasteringEngine::render`] blocks: commands are drained with
//! `try_recv`, and the meter snapshot is published with `try_lock`.

use crate::domain::audio::{AudioBuffer, AudioError, Result};
use crate::domain::chain::{SignalChain, StageTargets};
use crate::domain::config::EngineConfig;
use crate::domain::noise::{LoopCursor, NoiseTextures};
use crate::domain::params::EqBands;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Control-to-audio messages
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Replace every stage target at once
    SetTargets(Box<StageTargets>),
    /// Install a new source; stops anything playing
    LoadSource(Arc<AudioBuffer>),
    /// Start the source at `offset_frames` with both noise loops at 0
    Start { generation: u64, offset_frames: usize },
    /// Stop the source and both noise loops of play `generation`
    Stop { generation: u64 },
    /// Begin recording the rendered output into preallocated buffers
    StartCapture(CaptureBuffer),
    /// Finish recording and hand the buffers back
    StopCapture,
}

/// Audio-to-control messages
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The source of play `generation` ran out; all voices are stopped
    SourceEnded { generation: u64 },
    /// Rendered output recorded between capture start and stop
    CaptureReady(AudioBuffer),
}

/// Fixed-capacity stereo recording buffers
///
/// Allocated on the control side. The audio thread only appends within the
/// reserved capacity and drops frames once it is full.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    capacity: usize,
}

impl CaptureBuffer {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
            capacity: frames,
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.left.len() >= self.capacity
    }

    /// Append as much of the block as fits; returns the frames taken
    pub fn record(&mut self, left: &[f32], right: &[f32]) -> usize {
        let take = left.len().min(right.len()).min(self.capacity - self.left.len());
        self.left.extend_from_slice(&left[..take]);
        self.right.extend_from_slice(&right[..take]);
        take
    }

    fn into_buffer(self, sample_rate: u32) -> Result<AudioBuffer> {
        AudioBuffer::new(vec![self.left, self.right], sample_rate)
    }
}

/// Primary source plus both noise loops; they only exist together
#[derive(Debug)]
struct Voices {
    generation: u64,
    position: usize,
    hiss: LoopCursor,
    crackle: LoopCursor,
}

/// Rolling window of the post-chain output for the meters
#[derive(Debug)]
struct MeterTap {
    ring: Vec<f32>,
    write: usize,
    shared: Arc<Mutex<Vec<f32>>>,
}

impl MeterTap {
    fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            ring: vec![0.0; window],
            write: 0,
            shared: Arc::new(Mutex::new(vec![0.0; window])),
        }
    }

    #[inline]
    fn push(&mut self, sample: f32) {
        self.ring[self.write] = sample;
        self.write += 1;
        if self.write == self.ring.len() {
            self.write = 0;
        }
    }

    /// Copy the window out, oldest first; skipped if a reader holds the lock
    fn publish(&self) {
        if let Ok(mut snapshot) = self.shared.try_lock() {
            snapshot.clear();
            snapshot.extend_from_slice(&self.ring[self.write..]);
            snapshot.extend_from_slice(&self.ring[..self.write]);
        }
    }
}

/// Audio-thread side of the engine
pub struct MasteringEngine {
    chain: SignalChain,
    noise: NoiseTextures,
    source: Option<Arc<AudioBuffer>>,
    voices: Option<Voices>,
    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
    clock: Arc<AtomicU64>,
    meter: MeterTap,
    capture: Option<CaptureBuffer>,
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

impl std::fmt::Debug for MasteringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasteringEngine")
            .field("sample_rate", &self.sample_rate)
            .field("playing", &self.voices.is_some())
            .finish()
    }
}

impl MasteringEngine {
    /// Build the engine and its control handle
    pub fn new(config: &EngineConfig, eq: &EqBands) -> Result<(Self, EngineHandle)> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let chain = SignalChain::new(
            config.sample_rate as f32,
            eq,
            config.time_constant_secs(),
            config.block_size,
        );
        let noise = NoiseTextures::generate(config.sample_rate, config.noise_seed);
        Ok(Self::with_parts(chain, noise, config))
    }

    fn with_parts(chain: SignalChain, noise: NoiseTextures, config: &EngineConfig) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let clock = Arc::new(AtomicU64::new(0));
        let meter = MeterTap::new(config.analysis_window);

        let handle = EngineHandle {
            commands: command_tx,
            events: event_rx,
            clock: Arc::clone(&clock),
            meter: Arc::clone(&meter.shared),
            sample_rate: config.sample_rate,
        };

        info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            "Mastering engine created"
        );

        let engine = Self {
            chain,
            noise,
            source: None,
            voices: None,
            commands: command_rx,
            events: event_tx,
            clock,
            meter,
            capture: None,
            left: vec![0.0; config.block_size],
            right: vec![0.0; config.block_size],
            sample_rate: config.sample_rate,
        };
        (engine, handle)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_playing(&self) -> bool {
        self.voices.is_some()
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetTargets(targets) => self.chain.apply_targets(&targets),
            EngineCommand::LoadSource(source) => {
                self.voices = None;
                self.source = Some(source);
            }
            EngineCommand::Start {
                generation,
                offset_frames,
            } => {
                if self.source.is_some() {
                    self.voices = Some(Voices {
                        generation,
                        position: offset_frames,
                        hiss: self.noise.hiss_cursor(),
                        crackle: self.noise.crackle_cursor(),
                    });
                }
            }
            EngineCommand::Stop { generation } => {
                if self.voices.as_ref().is_some_and(|v| v.generation == generation) {
                    self.voices = None;
                }
            }
            EngineCommand::StartCapture(buffer) => {
                self.finish_capture();
                self.capture = Some(buffer);
            }
            EngineCommand::StopCapture => self.finish_capture(),
        }
    }

    /// Hand the recording to the control side, which also frees it
    fn finish_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            if let Ok(buffer) = capture.into_buffer(self.sample_rate) {
                let _ = self.events.send(EngineEvent::CaptureReady(buffer));
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Render `out.len() / channels` interleaved frames
    ///
    /// Mono outputs receive the average of both chain channels; channels past
    /// the second are silent.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();

        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block = self.left.len();
        let mut done = 0;

        while done < frames {
            let n = (frames - done).min(block);
            self.render_block(n);

            for i in 0..n {
                let (l, r) = (self.left[i], self.right[i]);
                let frame = &mut out[(done + i) * channels..(done + i + 1) * channels];
                if channels == 1 {
                    frame[0] = 0.5 * (l + r);
                } else {
                    frame[0] = l;
                    frame[1] = r;
                    frame[2..].fill(0.0);
                }
            }
            done += n;
        }

        out[frames * channels..].fill(0.0);
        self.meter.publish();
        self.clock.fetch_add(frames as u64, Ordering::Release);
    }

    fn render_block(&mut self, n: usize) {
        let left = &mut self.left[..n];
        let right = &mut self.right[..n];
        let mut ended = None;

        match (&mut self.voices, &self.source) {
            (Some(voices), Some(source)) => {
                let len = source.len();
                for i in 0..n {
                    let pos = voices.position + i;
                    (left[i], right[i]) = if pos < len { source.stereo_frame(pos) } else { (0.0, 0.0) };
                }
                voices.position += n;
                if voices.position >= len {
                    ended = Some(voices.generation);
                }
                self.chain
                    .process(left, right, Some((&mut voices.hiss, &mut voices.crackle)));
            }
            _ => {
                left.fill(0.0);
                right.fill(0.0);
                self.chain.process(left, right, None);
            }
        }

        if let Some(generation) = ended {
            // Source and noise loops stop together
            self.voices = None;
            let _ = self.events.send(EngineEvent::SourceEnded { generation });
        }

        for i in 0..n {
            self.meter.push(0.5 * (left[i] + right[i]));
        }
        if let Some(capture) = self.capture.as_mut().filter(|c| !c.is_full()) {
            capture.record(left, right);
        }
    }
}

/// Control-side handle to a running [`MasteringEngine`]
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    clock: Arc<AtomicU64>,
    meter: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl EngineHandle {
    /// Fire-and-forget; fails only if the audio side is gone
    pub fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            warn!("Audio engine dropped its command channel");
            AudioError::EngineUnavailable
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far
    pub fn frames_rendered(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Engine clock in seconds
    pub fn now_secs(&self) -> f64 {
        self.frames_rendered() as f64 / self.sample_rate as f64
    }

    /// Pending events, oldest first
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }

    /// Copy the latest meter window into `out`
    ///
    /// Returns false without waiting if the audio thread is publishing.
    pub fn meter_snapshot(&self, out: &mut Vec<f32>) -> bool {
        match self.meter.try_lock() {
            Ok(snapshot) => {
                out.clear();
                out.extend_from_slice(&snapshot);
                true
            }
            Err(_) => {
                debug!("Meter snapshot busy, skipping frame");
                false
            }
        }
    }
}
