//! End-to-end tests: control session -> command channel -> render engine
//!
//! Every test drives the engine by hand with `render`, so the engine clock
//! advances exactly as far as the test renders.

use async_trait::async_trait;
use forge_core::domain::analysis::{spawn_analysis, AnalysisError, AnalysisRequest, SuggestionService};
use forge_core::domain::audio::AudioBuffer;
use forge_core::domain::params::FxParameters;
use forge_core::domain::presets::PresetId;
use forge_core::domain::transport::TransportState;
use forge_core::domain::wav::{dequantize_sample, encode_wav};
use forge_tests::{mono_source, peak, render, rig, rms, sine, RATE};
use std::sync::Arc;

// ============================================================================
// TRANSPORT
// ============================================================================

#[test]
fn test_pause_and_resume_keep_position() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(440.0, 0.5, 3.0))).unwrap();

    session.play().unwrap();
    render(&mut engine, RATE as usize);
    session.pause().unwrap();
    let (left, _) = render(&mut engine, 4800);
    assert_eq!(session.transport_state(), TransportState::Paused);
    assert!((session.position() - 1.0).abs() < 1e-6);
    // Filter tails decay quickly once the source stops
    assert!(rms(&left[2400..]) < 1e-3);

    session.play().unwrap();
    render(&mut engine, RATE as usize / 2);
    assert!((session.position() - 1.5).abs() < 1e-6);
}

#[test]
fn test_natural_end_resets_to_start() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(440.0, 0.5, 0.5))).unwrap();
    session.play().unwrap();

    render(&mut engine, RATE as usize);
    session.poll().unwrap();

    assert_eq!(session.transport_state(), TransportState::Idle);
    assert_eq!(session.position(), 0.0);

    // Next play starts over from the beginning
    session.play().unwrap();
    render(&mut engine, 512);
    assert!(engine.is_playing());
    assert!((session.position() - 512.0 / RATE as f64).abs() < 1e-9);
}

#[test]
fn test_toggle_alternates() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(220.0, 0.5, 1.0))).unwrap();

    session.toggle().unwrap();
    assert!(session.is_playing());
    render(&mut engine, 1024);
    session.toggle().unwrap();
    assert_eq!(session.transport_state(), TransportState::Paused);
}

// ============================================================================
// NOISE TEXTURES
// ============================================================================

#[test]
fn test_noise_only_while_playing() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(vec![0.0; RATE as usize * 2])).unwrap();
    session
        .set_fx(FxParameters {
            hiss: 100.0,
            crackle: 100.0,
            ..Default::default()
        })
        .unwrap();

    let (idle, _) = render(&mut engine, 4800);
    assert_eq!(peak(&idle), 0.0);

    session.play().unwrap();
    let (playing, _) = render(&mut engine, 4800);
    assert!(rms(&playing) > 1e-3, "hiss should be audible, got {}", rms(&playing));

    session.pause().unwrap();
    render(&mut engine, 4800);
    let (after, _) = render(&mut engine, 4800);
    assert!(rms(&after) < 1e-4);
}

#[test]
fn test_bypass_silences_textures() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(vec![0.0; RATE as usize])).unwrap();
    session.apply_preset(PresetId::Vinyl).unwrap();
    session.play().unwrap();

    let (textured, _) = render(&mut engine, 9600);
    assert!(rms(&textured) > 1e-3);

    session.set_bypass(true).unwrap();
    render(&mut engine, 9600);
    let (bypassed, _) = render(&mut engine, 9600);
    assert!(rms(&bypassed) < 1e-5, "textures leaked: {}", rms(&bypassed));
    assert!(session.is_playing());
}

// ============================================================================
// PARAMETERS
// ============================================================================

#[test]
fn test_vinyl_preset_reaches_chain() {
    let (mut engine, mut session) = rig(0.0);
    session.apply_preset(PresetId::Vinyl).unwrap();
    render(&mut engine, 64);

    let targets = engine.chain().targets();
    assert_eq!(targets.hpf_hz, 65.0);
    assert_eq!(targets.lpf_hz, 8500.0);
    assert_eq!(targets.eq_gains_db[0], -8.0);
    assert_eq!(targets.eq_gains_db[11], -18.0);
    assert!((targets.compressor_threshold_db + 15.0).abs() < 1e-4);
    assert!((targets.compressor_ratio - 4.0).abs() < 1e-6);
}

#[test]
fn test_bypass_keeps_settings_but_neutralizes_coloring() {
    let (mut engine, mut session) = rig(0.0);
    session.apply_preset(PresetId::Broadcast).unwrap();
    session.set_bypass(true).unwrap();
    render(&mut engine, 64);

    assert_eq!(session.params().fx.compression, 85.0);
    let targets = engine.chain().targets();
    assert!(targets.eq_gains_db.iter().all(|g| *g == 0.0));
    assert_eq!(targets.compressor_ratio, 1.0);
    assert_eq!((targets.width_mid, targets.width_side), (1.0, 1.0));
    // Filters stay in the path
    assert_eq!(targets.hpf_hz, 50.0);
    assert_eq!(targets.lpf_hz, 18000.0);
}

#[test]
fn test_zero_width_collapses_to_mono() {
    let (mut engine, mut session) = rig(0.0);
    let left = sine(440.0, 0.4, 0.5);
    let right = sine(660.0, 0.4, 0.5);
    session
        .load_source(AudioBuffer::new(vec![left, right], RATE).unwrap())
        .unwrap();
    session
        .set_fx(FxParameters {
            width: 0.0,
            ..Default::default()
        })
        .unwrap();
    session.play().unwrap();

    let (l, r) = render(&mut engine, 9600);
    assert!(rms(&l) > 0.01);
    assert!(l.iter().zip(&r).all(|(a, b)| (a - b).abs() < 1e-6));
}

#[test]
fn test_output_never_exceeds_ceiling() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(100.0, 1.0, 1.0))).unwrap();
    session.apply_preset(PresetId::Cinematic).unwrap();
    session.set_master_gain(12.0).unwrap();
    session.play().unwrap();

    let (l, r) = render(&mut engine, RATE as usize);
    assert!(peak(&l) <= 1.0);
    assert!(peak(&r) <= 1.0);
    assert!(peak(&l) > 0.5);
}

#[test]
fn test_master_gain_glides() {
    let (mut engine, mut session) = rig(50.0);
    session.load_source(mono_source(sine(1000.0, 0.5, 3.0))).unwrap();
    session.play().unwrap();
    let (before, _) = render(&mut engine, RATE as usize / 2);

    session.set_master_gain(-60.0).unwrap();
    let (first, _) = render(&mut engine, 96);
    // 2 ms into a 50 ms glide the level has barely moved
    assert!(rms(&first) > 0.8 * rms(&before[12000..]));

    let (_, _) = render(&mut engine, RATE as usize);
    let (settled, _) = render(&mut engine, 4800);
    assert!(rms(&settled) < 1e-3 * rms(&before[12000..]) * 1.5);
}

// ============================================================================
// AI SUGGESTIONS
// ============================================================================

struct FixedService(String);

#[async_trait]
impl SuggestionService for FixedService {
    async fn suggest(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        assert!(request.prompt().contains(&request.rms));
        Ok(self.0.clone())
    }
}

fn suggestion_json() -> String {
    let eq = vec!["-1.5"; 12].join(",");
    format!(
        r#"{{"rms":"-9.03","peak":"-6.02","suggestion":"Widen and glue","neuralSettings":{{"eq":[{eq}],"fx":{{"width":120,"compression":35,"hiss":12}}}}}}"#
    )
}

#[tokio::test]
async fn test_suggestion_applied_end_to_end() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(440.0, 0.5, 1.0))).unwrap();
    session.set_bypass(true).unwrap();

    let (ticket, request) = session.begin_analysis().unwrap();
    assert_eq!(request.rms, "-9.03");
    assert_eq!(request.peak, "-6.02");

    let service: Arc<dyn SuggestionService> = Arc::new(FixedService(suggestion_json()));
    let (ticket, outcome) = spawn_analysis(service, ticket, request).await.unwrap();
    session.finish_analysis(ticket, outcome).unwrap();
    session.apply_neural_remaster().unwrap();
    render(&mut engine, 64);

    assert!(session.is_neural_active());
    assert!(!session.params().bypass);
    let targets = engine.chain().targets();
    assert!(targets.eq_gains_db.iter().all(|g| *g == -3.0));
    // 120 * 1.2 = 144 % width
    assert!((targets.width_side - 1.44).abs() < 1e-4);
    // 35 + 10 = 45 % compression
    assert!((targets.compressor_ratio - 5.5).abs() < 1e-4);
}

#[tokio::test]
async fn test_suggestion_for_replaced_source_is_dropped() {
    let (_engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(440.0, 0.5, 1.0))).unwrap();
    let (ticket, request) = session.begin_analysis().unwrap();

    session.load_source(mono_source(sine(880.0, 0.2, 1.0))).unwrap();

    let service: Arc<dyn SuggestionService> = Arc::new(FixedService(suggestion_json()));
    let (ticket, outcome) = spawn_analysis(service, ticket, request).await.unwrap();
    assert!(matches!(
        session.finish_analysis(ticket, outcome),
        Err(AnalysisError::Stale)
    ));
    assert!(session.report().is_none());
    assert_eq!(session.params().eq.gains(), vec![0.0; 12]);
}

// ============================================================================
// EXPORT
// ============================================================================

#[test]
fn test_captured_output_exports_as_wav() {
    let (mut engine, mut session) = rig(0.0);
    session.load_source(mono_source(sine(440.0, 0.5, 1.0))).unwrap();
    session.start_capture().unwrap();
    session.play().unwrap();
    render(&mut engine, 24000);
    session.stop_capture().unwrap();
    render(&mut engine, 0);
    session.poll().unwrap();

    let captured = session.take_capture().unwrap();
    assert_eq!(captured.len(), 24000);
    assert_eq!(captured.num_channels(), 2);

    let bytes = encode_wav(&captured);
    assert_eq!(bytes.len(), 44 + 24000 * 4);

    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, RATE);

    // Interleaved L/R: even samples are the left channel
    let restored: Vec<f32> = reader
        .into_samples::<i16>()
        .step_by(2)
        .map(|s| dequantize_sample(s.unwrap()))
        .collect();
    let original = captured.channel(0).unwrap();
    assert_eq!(restored.len(), original.len());
    assert!(original
        .iter()
        .zip(&restored)
        .all(|(a, b)| (a - b).abs() <= 2.0 / 32767.0));
}
