//! AI mastering suggestions
//!
//! The session sends an [`AnalysisRequest`] (RMS and peak of the loaded
//! source) to a [`SuggestionService`] and gets back a JSON document that
//! parses into an [`AnalysisReport`]. The report may carry a
//! [`NeuralPreset`], which [`NeuralPreset::merge_into`] folds into the
//! current parameter set with a fixed scaling.

use crate::domain::metering::LevelSummary;
use crate::domain::params::{FxParameters, ParameterSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Suggested EQ gains are doubled before they are applied
pub const EQ_SUGGESTION_SCALE: f32 = 2.0;
/// Suggested width is widened by 20 %
pub const WIDTH_SUGGESTION_SCALE: f32 = 1.2;
/// Suggested compression gets +10 on top
pub const COMPRESSION_SUGGESTION_OFFSET: f32 = 10.0;

const DEFAULT_SUGGESTED_WIDTH: f32 = 100.0;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Suggestion service request failed: {0}")]
    Network(String),

    #[error("Malformed suggestion response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Suggestion response is missing {0}")]
    MissingField(&'static str),

    #[error("Suggested EQ has {actual} bands, expected {expected}")]
    BandCountMismatch { expected: usize, actual: usize },

    #[error("Analysis result belongs to a previous source")]
    Stale,

    #[error("Suggestion service unavailable: {0}")]
    Unavailable(String),
}

/// Level statistics sent to the suggestion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    /// RMS in dB, two decimals
    pub rms: String,
    /// Peak in dB, two decimals
    pub peak: String,
    /// Number of EQ gains the response must carry
    pub eq_bands: usize,
}

impl AnalysisRequest {
    pub fn from_levels(levels: &LevelSummary, eq_bands: usize) -> Self {
        let (rms, peak) = levels.formatted();
        Self { rms, peak, eq_bands }
    }

    /// Instruction text for the model
    pub fn prompt(&self) -> String {
        format!(
            "Mastering analysis request. Source statistics: RMS={rms}dB, Peak={peak}dB. \
             Respond with JSON only, using this schema: \
             {{\"rms\": string, \"peak\": string, \"suggestion\": string, \
             \"neuralSettings\": {{\"eq\": [{n} numbers], \"fx\": {{\"denoise\", \"clarity\", \
             \"width\", \"saturation\", \"compression\", \"bass\", \"mid\", \"treble\", \
             \"crackle\", \"hiss\"}}}}}}. \
             1. suggestion: one short paragraph on the mastering approach. \
             2. eq: {n} gains in dB for the bands from 32 Hz to 20 kHz. \
             3. fx: knob values, including the crackle and hiss textures.",
            rms = self.rms,
            peak = self.peak,
            n = self.eq_bands,
        )
    }
}

/// Knob values suggested by the service; any may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestedFx {
    pub denoise: Option<f32>,
    pub clarity: Option<f32>,
    pub width: Option<f32>,
    pub saturation: Option<f32>,
    pub compression: Option<f32>,
    pub hpf: Option<f32>,
    pub lpf: Option<f32>,
    pub bass: Option<f32>,
    pub mid: Option<f32>,
    pub treble: Option<f32>,
    pub crackle: Option<f32>,
    pub hiss: Option<f32>,
}

/// Raw EQ and FX values from the service, before scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralPreset {
    pub eq: Vec<f32>,
    #[serde(default)]
    pub fx: SuggestedFx,
}

impl NeuralPreset {
    /// Fold the suggestion into `params`
    ///
    /// EQ gains are doubled. Provided knobs override the current ones, then
    /// width (100 when missing or zero) is scaled by 1.2 and compression
    /// (0 when missing) gets +10. Bypass is cleared. Everything is clamped to
    /// range. Nothing is changed when the EQ band count is wrong.
    pub fn merge_into(&self, params: &mut ParameterSet) -> Result<(), AnalysisError> {
        if self.eq.len() != params.eq.len() {
            return Err(AnalysisError::BandCountMismatch {
                expected: params.eq.len(),
                actual: self.eq.len(),
            });
        }

        let current = params.fx;
        let s = &self.fx;
        let width = s.width.filter(|w| *w != 0.0).unwrap_or(DEFAULT_SUGGESTED_WIDTH);
        let compression = s.compression.unwrap_or(0.0);

        let merged = FxParameters {
            denoise: s.denoise.unwrap_or(current.denoise),
            clarity: s.clarity.unwrap_or(current.clarity),
            width: width * WIDTH_SUGGESTION_SCALE,
            saturation: s.saturation.unwrap_or(current.saturation),
            compression: compression + COMPRESSION_SUGGESTION_OFFSET,
            hpf: s.hpf.unwrap_or(current.hpf),
            lpf: s.lpf.unwrap_or(current.lpf),
            bass: s.bass.unwrap_or(current.bass),
            mid: s.mid.unwrap_or(current.mid),
            treble: s.treble.unwrap_or(current.treble),
            crackle: s.crackle.unwrap_or(current.crackle),
            hiss: s.hiss.unwrap_or(current.hiss),
        };

        for (id, gain) in self.eq.iter().enumerate() {
            params.eq.set_gain(id, gain * EQ_SUGGESTION_SCALE);
        }
        params.fx = merged.clamped();
        params.bypass = false;
        Ok(())
    }
}

/// Parsed suggestion service response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub rms: String,
    pub peak: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral_centroid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neural_settings: Option<NeuralPreset>,
}

impl AnalysisReport {
    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Suggested preset, or `MissingField` when the response had none
    pub fn neural_preset(&self) -> Result<&NeuralPreset, AnalysisError> {
        self.neural_settings
            .as_ref()
            .ok_or(AnalysisError::MissingField("neuralSettings"))
    }

    /// Context line shared with a connected live link
    pub fn context_message(&self) -> String {
        format!(
            "INCOMING_DNA_DATA: RMS={}, Peak={}. Analysis Summary: {}",
            self.rms, self.peak, self.suggestion
        )
    }
}

/// Identifies the source an analysis was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    pub(crate) generation: u64,
}

impl AnalysisTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Remote model producing mastering suggestions as JSON text
#[async_trait]
pub trait SuggestionService: Send + Sync {
    async fn suggest(&self, request: &AnalysisRequest) -> Result<String, AnalysisError>;
}

/// Ask the service and parse its answer
pub async fn request_report(
    service: &dyn SuggestionService,
    request: &AnalysisRequest,
) -> Result<AnalysisReport, AnalysisError> {
    debug!(rms = %request.rms, peak = %request.peak, "Requesting mastering suggestion");
    let text = service.suggest(request).await?;
    let report = AnalysisReport::from_json(&text);
    if let Err(e) = &report {
        warn!(error = %e, "Suggestion service returned an unusable response");
    }
    report
}

/// Run [`request_report`] on the tokio runtime
///
/// The ticket comes back with the result so the session can discard answers
/// for a source that is no longer loaded.
pub fn spawn_analysis(
    service: Arc<dyn SuggestionService>,
    ticket: AnalysisTicket,
    request: AnalysisRequest,
) -> JoinHandle<(AnalysisTicket, Result<AnalysisReport, AnalysisError>)> {
    tokio::spawn(async move {
        let result = request_report(service.as_ref(), &request).await;
        (ticket, result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::EqBands;

    struct Canned(Result<String, String>);

    #[async_trait]
    impl SuggestionService for Canned {
        async fn suggest(&self, _request: &AnalysisRequest) -> Result<String, AnalysisError> {
            self.0.clone().map_err(AnalysisError::Network)
        }
    }

    fn report_json(eq: &[f32], fx: &str) -> String {
        let eq: Vec<String> = eq.iter().map(|g| g.to_string()).collect();
        format!(
            r#"{{"rms":"-14.00","peak":"-1.00","suggestion":"Tame the lows","neuralSettings":{{"eq":[{}],"fx":{}}}}}"#,
            eq.join(","),
            fx
        )
    }

    #[test]
    fn test_request_formats_levels() {
        let levels = LevelSummary { rms_db: -14.256, peak_db: -0.5 };
        let request = AnalysisRequest::from_levels(&levels, 12);
        assert_eq!(request.rms, "-14.26");
        assert_eq!(request.peak, "-0.50");

        let prompt = request.prompt();
        assert!(prompt.contains("RMS=-14.26dB"));
        assert!(prompt.contains("Peak=-0.50dB"));
        assert!(prompt.contains("12 gains"));
    }

    #[test]
    fn test_parse_full_report() {
        let json = report_json(&[1.0; 12], r#"{"width":110,"compression":20,"hiss":5}"#);
        let report = AnalysisReport::from_json(&json).unwrap();
        assert_eq!(report.rms, "-14.00");
        assert_eq!(report.suggestion, "Tame the lows");
        assert!(report.spectral_centroid.is_none());

        let preset = report.neural_preset().unwrap();
        assert_eq!(preset.eq.len(), 12);
        assert_eq!(preset.fx.width, Some(110.0));
        assert_eq!(preset.fx.denoise, None);
    }

    #[test]
    fn test_parse_optional_fields() {
        let json = r#"{"rms":"-20.00","peak":"-3.00","suggestion":"ok","spectralCentroid":"2.1kHz"}"#;
        let report = AnalysisReport::from_json(json).unwrap();
        assert_eq!(report.spectral_centroid.as_deref(), Some("2.1kHz"));
        assert!(matches!(
            report.neural_preset(),
            Err(AnalysisError::MissingField("neuralSettings"))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            AnalysisReport::from_json("not json"),
            Err(AnalysisError::Malformed(_))
        ));
        assert!(matches!(
            AnalysisReport::from_json(r#"{"rms":"-1.00"}"#),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[test]
    fn test_merge_scaling() {
        let mut params = ParameterSet {
            bypass: true,
            ..Default::default()
        };
        params.fx.hiss = 40.0;
        let preset = NeuralPreset {
            eq: vec![3.0; 12],
            fx: SuggestedFx {
                width: Some(100.0),
                compression: Some(20.0),
                saturation: Some(15.0),
                ..Default::default()
            },
        };

        preset.merge_into(&mut params).unwrap();

        assert!(params.eq.gains().iter().all(|g| *g == 6.0));
        assert!((params.fx.width - 120.0).abs() < 1e-4);
        assert_eq!(params.fx.compression, 30.0);
        assert_eq!(params.fx.saturation, 15.0);
        assert_eq!(params.fx.hiss, 40.0);
        assert!(!params.bypass);
    }

    #[test]
    fn test_merge_missing_width_and_compression() {
        let mut params = ParameterSet::default();
        params.fx.width = 50.0;
        params.fx.compression = 70.0;
        let preset = NeuralPreset {
            eq: vec![0.0; 12],
            fx: SuggestedFx::default(),
        };

        preset.merge_into(&mut params).unwrap();

        assert!((params.fx.width - 120.0).abs() < 1e-4);
        assert_eq!(params.fx.compression, 10.0);
    }

    #[test]
    fn test_merge_clamps() {
        let mut params = ParameterSet::default();
        let preset = NeuralPreset {
            eq: vec![15.0; 12],
            fx: SuggestedFx {
                width: Some(190.0),
                compression: Some(95.0),
                ..Default::default()
            },
        };

        preset.merge_into(&mut params).unwrap();

        assert!(params.eq.gains().iter().all(|g| *g == 18.0));
        assert_eq!(params.fx.width, 200.0);
        assert_eq!(params.fx.compression, 100.0);
    }

    #[test]
    fn test_merge_rejects_band_mismatch() {
        let mut params = ParameterSet::default();
        let before = params.clone();
        let preset = NeuralPreset {
            eq: vec![1.0; 10],
            fx: SuggestedFx::default(),
        };

        assert!(matches!(
            preset.merge_into(&mut params),
            Err(AnalysisError::BandCountMismatch { expected: 12, actual: 10 })
        ));
        assert_eq!(params, before);
        assert_eq!(EqBands::default().len(), 12);
    }

    #[test]
    fn test_context_message() {
        let report = AnalysisReport::from_json(&report_json(&[0.0; 12], "{}")).unwrap();
        assert_eq!(
            report.context_message(),
            "INCOMING_DNA_DATA: RMS=-14.00, Peak=-1.00. Analysis Summary: Tame the lows"
        );
    }

    #[tokio::test]
    async fn test_request_report_parses_service_output() {
        let service = Canned(Ok(report_json(&[2.0; 12], "{}")));
        let request = AnalysisRequest::from_levels(&LevelSummary { rms_db: -10.0, peak_db: 0.0 }, 12);
        let report = request_report(&service, &request).await.unwrap();
        assert_eq!(report.neural_preset().unwrap().eq, vec![2.0; 12]);
    }

    #[tokio::test]
    async fn test_spawned_analysis_returns_ticket() {
        let service: Arc<dyn SuggestionService> = Arc::new(Canned(Err("offline".to_string())));
        let ticket = AnalysisTicket { generation: 7 };
        let request = AnalysisRequest::from_levels(&LevelSummary { rms_db: -10.0, peak_db: 0.0 }, 12);

        let (returned, result) = spawn_analysis(service, ticket, request).await.unwrap();
        assert_eq!(returned.generation(), 7);
        assert!(matches!(result, Err(AnalysisError::Network(_))));
    }
}
