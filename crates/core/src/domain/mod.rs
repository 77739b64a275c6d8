//! Domain entities and business rules

pub mod analysis;
pub mod audio;
pub mod chain;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod live;
pub mod metering;
pub mod noise;
pub mod params;
pub mod presets;
pub mod session;
pub mod smoothing;
pub mod sync;
pub mod transport;
pub mod wav;

// Re-export specific items to avoid ambiguous glob imports
pub use analysis::{
    AnalysisError, AnalysisReport, AnalysisRequest, AnalysisTicket, NeuralPreset, SuggestionService,
};
pub use audio::{AudioBuffer, AudioError, ChannelCount, SampleRate};
pub use chain::{SignalChain, StageId, StageTargets};
pub use config::{ConfigError, ConfigManager, EngineConfig, ForgeConfig};
pub use engine::{CaptureBuffer, EngineCommand, EngineEvent, EngineHandle, MasteringEngine};
pub use live::{LinkFault, LinkState, LiveLink, LiveTransport};
pub use metering::{LevelSummary, MeterReading, SpectrumAnalyzer};
pub use noise::NoiseTextures;
pub use params::{BandShape, EqBand, EqBands, FxParameters, MasterGain, ParameterSet};
pub use presets::PresetId;
pub use session::{MasteringSession, SessionError};
pub use smoothing::SmoothedParam;
pub use sync::ParameterSynchronizer;
pub use transport::{Transport, TransportAction, TransportState};
