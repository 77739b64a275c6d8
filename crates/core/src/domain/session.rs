//! Control-side session
//!
//! [`MasteringSession`] owns everything the user edits: the parameter set,
//! the transport state machine and the analysis state. Every edit is turned
//! into a full [`StageTargets`](crate::domain::chain::StageTargets) snapshot
//! and sent to the audio thread in one message.

use crate::domain::analysis::{AnalysisError, AnalysisReport, AnalysisRequest, AnalysisTicket};
use crate::domain::audio::{AudioBuffer, AudioError, Result};
use crate::domain::config::EngineConfig;
use crate::domain::engine::{CaptureBuffer, EngineCommand, EngineEvent, EngineHandle};
use crate::domain::metering::{analyze_levels, LevelSummary, MeterReading, SpectrumAnalyzer};
use crate::domain::params::{FxParameters, MasterGain, ParameterSet};
use crate::domain::presets::PresetId;
use crate::domain::sync::ParameterSynchronizer;
use crate::domain::transport::{Transport, TransportAction, TransportState};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

pub struct MasteringSession {
    params: ParameterSet,
    sync: ParameterSynchronizer,
    transport: Transport,
    engine: EngineHandle,
    source: Option<Arc<AudioBuffer>>,
    /// Bumped on every source load; analysis tickets carry it
    source_generation: u64,
    scanning: bool,
    report: Option<AnalysisReport>,
    neural_active: bool,
    capturing: bool,
    captured: Option<AudioBuffer>,
    meter_window: Vec<f32>,
    meter_floor_db: f32,
    spectrum: SpectrumAnalyzer,
}

impl std::fmt::Debug for MasteringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasteringSession")
            .field("state", &self.transport.state())
            .field("bypass", &self.params.bypass)
            .field("neural_active", &self.neural_active)
            .finish()
    }
}

impl MasteringSession {
    /// Attach to an engine and push the default parameter set
    pub fn new(engine: EngineHandle, config: &EngineConfig) -> Result<Self> {
        let mut session = Self {
            params: ParameterSet::default(),
            sync: ParameterSynchronizer::new(),
            transport: Transport::new(config.end_tolerance_secs),
            engine,
            source: None,
            source_generation: 0,
            scanning: false,
            report: None,
            neural_active: false,
            capturing: false,
            captured: None,
            meter_window: Vec::with_capacity(config.analysis_window),
            meter_floor_db: config.meter_floor_db,
            spectrum: SpectrumAnalyzer::new(config.analysis_window),
        };
        session.push_targets()?;
        Ok(session)
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Playback position in seconds
    pub fn position(&self) -> f64 {
        self.transport.position(self.engine.now_secs())
    }

    pub fn source(&self) -> Option<&Arc<AudioBuffer>> {
        self.source.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        self.report.as_ref()
    }

    /// True while the last parameter change came from an AI suggestion
    pub fn is_neural_active(&self) -> bool {
        self.neural_active
    }

    // --- source and transport ---

    /// Replace the source; playback stops and the position resets
    ///
    /// The buffer must already be at the engine rate.
    pub fn load_source(&mut self, buffer: AudioBuffer) -> Result<()> {
        if buffer.sample_rate() != self.engine.sample_rate() {
            return Err(AudioError::InvalidConfiguration(format!(
                "source is {} Hz, engine runs at {} Hz",
                buffer.sample_rate(),
                self.engine.sample_rate()
            )));
        }
        if buffer.is_empty() {
            return Err(AudioError::Decode("source has no samples".to_string()));
        }

        let source = Arc::new(buffer);
        if let Some(action) = self.transport.load(source.duration_secs()) {
            self.dispatch(action)?;
        }
        self.engine.send(EngineCommand::LoadSource(Arc::clone(&source)))?;

        self.source = Some(source);
        self.source_generation += 1;
        self.scanning = false;
        self.report = None;
        info!(generation = self.source_generation, "Source loaded");
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        match self.transport.play(self.engine.now_secs())? {
            Some(action) => self.dispatch(action),
            None => Ok(()),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.transport.pause(self.engine.now_secs()) {
            Some(action) => self.dispatch(action),
            None => Ok(()),
        }
    }

    pub fn toggle(&mut self) -> Result<()> {
        match self.transport.toggle(self.engine.now_secs())? {
            Some(action) => self.dispatch(action),
            None => Ok(()),
        }
    }

    /// Handle everything the audio thread reported since the last poll
    pub fn poll(&mut self) -> Result<()> {
        for event in self.engine.drain_events() {
            match event {
                EngineEvent::SourceEnded { generation } => {
                    // The engine has already stopped the voices
                    self.transport.on_source_ended(generation, self.engine.now_secs());
                }
                EngineEvent::CaptureReady(buffer) => {
                    debug!(frames = buffer.len(), "Capture received");
                    self.captured = Some(buffer);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, action: TransportAction) -> Result<()> {
        let command = match action {
            TransportAction::Start {
                offset_secs,
                generation,
            } => EngineCommand::Start {
                generation,
                offset_frames: (offset_secs * self.engine.sample_rate() as f64).round() as usize,
            },
            TransportAction::Stop { generation } => EngineCommand::Stop { generation },
        };
        self.engine.send(command)
    }

    // --- parameters ---

    /// Knob edits keep the AI indicator; only EQ edits and presets clear it
    pub fn set_fx(&mut self, fx: FxParameters) -> Result<()> {
        self.params.fx = fx.clamped();
        self.push_targets()
    }

    /// Returns false when no band has this id
    pub fn set_eq_gain(&mut self, band: usize, gain_db: f32) -> Result<bool> {
        if !self.params.eq.set_gain(band, gain_db) {
            return Ok(false);
        }
        self.neural_active = false;
        self.push_targets()?;
        Ok(true)
    }

    pub fn set_master_gain(&mut self, gain_db: f32) -> Result<()> {
        self.params.master_gain = MasterGain::new(gain_db);
        self.push_targets()
    }

    pub fn set_bypass(&mut self, bypass: bool) -> Result<()> {
        self.params.bypass = bypass;
        self.push_targets()
    }

    /// Replace EQ and FX with a preset; bypass and the AI indicator clear
    pub fn apply_preset(&mut self, id: PresetId) -> Result<()> {
        let preset = id.build();
        self.params.eq = preset.eq;
        self.params.fx = preset.fx;
        if let Some(gain) = preset.master_gain {
            self.params.master_gain = gain;
        }
        self.params.bypass = false;
        self.neural_active = false;
        info!(preset = %id, "Preset applied");
        self.push_targets()
    }

    fn push_targets(&mut self) -> Result<()> {
        let targets = self.sync.synchronize(&self.params);
        self.engine.send(EngineCommand::SetTargets(Box::new(targets)))
    }

    // --- analysis ---

    /// Level summary of the loaded source
    pub fn levels(&self) -> Option<LevelSummary> {
        self.source.as_deref().map(analyze_levels)
    }

    /// Start an analysis of the loaded source
    ///
    /// Sets the scanning flag; the caller runs the request and hands the
    /// outcome to [`finish_analysis`](Self::finish_analysis).
    pub fn begin_analysis(&mut self) -> Result<(AnalysisTicket, AnalysisRequest)> {
        let levels = self.levels().ok_or(AudioError::NoSource)?;
        self.scanning = true;
        let ticket = AnalysisTicket {
            generation: self.source_generation,
        };
        Ok((ticket, AnalysisRequest::from_levels(&levels, self.params.eq.len())))
    }

    /// Store the outcome of an analysis
    ///
    /// Results for a source that has since been replaced are discarded with
    /// `Stale`. The scanning flag clears on success and on failure.
    pub fn finish_analysis(
        &mut self,
        ticket: AnalysisTicket,
        outcome: std::result::Result<AnalysisReport, AnalysisError>,
    ) -> std::result::Result<&AnalysisReport, AnalysisError> {
        if ticket.generation != self.source_generation {
            debug!(ticket = ticket.generation, current = self.source_generation, "Discarding stale analysis");
            return Err(AnalysisError::Stale);
        }
        self.scanning = false;

        match outcome {
            Ok(report) => {
                info!(rms = %report.rms, peak = %report.peak, "Analysis complete");
                Ok(&*self.report.insert(report))
            }
            Err(e) => {
                warn!(error = %e, "Analysis failed");
                Err(e)
            }
        }
    }

    /// Fold the suggested settings of the last report into the session
    pub fn apply_neural_remaster(&mut self) -> std::result::Result<(), SessionError> {
        let report = self.report.as_ref().ok_or(AnalysisError::MissingField("report"))?;
        report.neural_preset()?.merge_into(&mut self.params)?;
        self.neural_active = true;
        info!("AI remaster applied");
        Ok(self.push_targets()?)
    }

    // --- metering and capture ---

    /// Level reading of the latest output window
    ///
    /// Also refreshes the spectrum unless the window is silent; `None` when
    /// the audio thread was busy.
    pub fn meter(&mut self) -> Option<MeterReading> {
        if !self.engine.meter_snapshot(&mut self.meter_window) {
            return None;
        }
        let reading = MeterReading::from_window(&self.meter_window, self.meter_floor_db);
        if !reading.is_silent() {
            self.spectrum.analyze(&self.meter_window);
        }
        Some(reading)
    }

    /// Spectrum of the last [`meter`](Self::meter) call, as display bytes
    pub fn spectrum_bytes(&self) -> Vec<u8> {
        self.spectrum.bytes()
    }

    /// Record the rendered output, with room for the whole loaded source
    ///
    /// The buffers are reserved here; frames past that length are dropped.
    pub fn start_capture(&mut self) -> Result<()> {
        let frames = self.source.as_deref().map(AudioBuffer::len).ok_or(AudioError::NoSource)?;
        self.captured = None;
        self.capturing = true;
        debug!(frames, "Capture buffers reserved");
        self.engine
            .send(EngineCommand::StartCapture(CaptureBuffer::with_capacity(frames)))
    }

    /// Ask the engine to hand over the recording; it arrives on a later poll
    pub fn stop_capture(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }
        self.capturing = false;
        self.engine.send(EngineCommand::StopCapture)
    }

    pub fn take_capture(&mut self) -> Option<AudioBuffer> {
        self.captured.take()
    }
}
