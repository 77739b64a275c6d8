//! Live voice link
//!
//! Framing and state for a duplex voice conversation with a remote model.
//! Microphone audio goes out as base64 16 kHz mono PCM; model speech comes
//! back as 24 kHz mono PCM and is queued gaplessly on a [`PlaybackTimeline`]
//! that is independent of the mastering transport. The network side is a
//! [`LiveTransport`] supplied by the host.

use crate::domain::analysis::AnalysisReport;
use crate::domain::audio::AudioBuffer;
use crate::domain::wav::{dequantize_sample, quantize_sample};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Length of the source excerpt sent with [`LiveLink::send_snippet`]
pub const SNIPPET_SECONDS: u32 = 8;
pub const SNIPPET_PROMPT: &str =
    "Mastering file snippet uploaded. Analyze frequency distribution and dynamic compression requirements.";

pub const LINK_ESTABLISHED: &str = "NEURAL_LINK_ESTABLISHED";
pub const LINK_CLOSED: &str = "TERMINAL_CLOSED";
pub const SNIPPET_COMPLETE: &str = "SNIPPET_STREAM_COMPLETE";

/// Why a link went down; `code()` is what the user sees
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkFault {
    #[error("No API credential configured")]
    MissingCredential,

    #[error("Microphone access denied")]
    MicrophoneDenied,

    #[error("Live link transport error: {0}")]
    Transport(String),
}

impl LinkFault {
    pub fn code(&self) -> &'static str {
        match self {
            LinkFault::MissingCredential => "API_KEY_NULL",
            LinkFault::MicrophoneDenied => "MIC_ACCESS_DENIED",
            LinkFault::Transport(_) => "NEURAL_LINK_FAULT",
        }
    }
}

/// One outgoing audio message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    /// Base64 of little-endian i16 samples
    pub data: String,
    pub mime_type: &'static str,
}

/// Decimate to 16 kHz by nearest sample and encode as base64 PCM
///
/// The output length is `round(len / ratio)`; no anti-alias filtering.
pub fn encode_input_frame(samples: &[f32], source_rate: u32) -> PcmFrame {
    let decimated: Vec<f32> = if source_rate == INPUT_SAMPLE_RATE || source_rate == 0 {
        samples.to_vec()
    } else {
        let ratio = source_rate as f64 / INPUT_SAMPLE_RATE as f64;
        let len = (samples.len() as f64 / ratio).round() as usize;
        (0..len)
            .map(|i| samples.get((i as f64 * ratio).floor() as usize).copied().unwrap_or(0.0))
            .collect()
    };

    let bytes: Vec<u8> = decimated
        .iter()
        .flat_map(|&s| quantize_sample(s).to_le_bytes())
        .collect();

    PcmFrame {
        data: STANDARD.encode(bytes),
        mime_type: INPUT_MIME_TYPE,
    }
}

/// Decode a base64 24 kHz mono PCM response into samples in [-1, 1)
///
/// A trailing odd byte is dropped.
pub fn decode_output_frame(data: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let bytes = STANDARD.decode(data)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|b| dequantize_sample(i16::from_le_bytes([b[0], b[1]])))
        .collect())
}

/// A decoded response placed on the playback timeline
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledClip {
    pub start_secs: f64,
    pub samples: Vec<f32>,
}

impl ScheduledClip {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / OUTPUT_SAMPLE_RATE as f64
    }

    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs()
    }
}

/// Back-to-back scheduling of response audio
///
/// Each clip starts where the previous one ends, or now if the queue has
/// drained.
#[derive(Debug, Default)]
pub struct PlaybackTimeline {
    next_start: f64,
    queued: Vec<ScheduledClip>,
}

impl PlaybackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: f64, samples: Vec<f32>) -> &ScheduledClip {
        let start_secs = self.next_start.max(now);
        let clip = ScheduledClip { start_secs, samples };
        self.next_start = clip.end_secs();
        self.queued.push(clip);
        &self.queued[self.queued.len() - 1]
    }

    /// Drop clips that have finished playing
    pub fn release_finished(&mut self, now: f64) {
        self.queued.retain(|clip| clip.end_secs() > now);
    }

    pub fn queued(&self) -> &[ScheduledClip] {
        &self.queued
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Stop everything queued
    pub fn clear(&mut self) {
        self.queued.clear();
        self.next_start = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down after a fault; see [`LiveLink::fault`]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    User,
    Model,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub id: u64,
    pub role: TranscriptRole,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Conversation log
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn push(&mut self, role: TranscriptRole, text: impl Into<String>) {
        self.next_id += 1;
        self.entries.push(TranscriptEntry {
            id: self.next_id,
            role,
            text: text.into(),
            timestamp: now_millis(),
        });
    }

    /// Append a model transcription fragment
    ///
    /// Consecutive model fragments extend the same entry.
    pub fn push_model_fragment(&mut self, fragment: &str) {
        match self.entries.last_mut() {
            Some(last) if last.role == TranscriptRole::Model => last.text.push_str(fragment),
            _ => self.push(TranscriptRole::Model, fragment),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Network side of a live link
pub trait LiveTransport: Send {
    fn send_audio(&mut self, frame: PcmFrame) -> Result<(), LinkFault>;
    fn send_text(&mut self, text: &str) -> Result<(), LinkFault>;
    fn close(&mut self);
}

/// Live link lifecycle: connect, stream, tear down
#[derive(Debug)]
pub struct LiveLink<T: LiveTransport> {
    state: LinkState,
    transport: Option<T>,
    capturing: bool,
    timeline: PlaybackTimeline,
    transcript: Transcript,
    fault: Option<LinkFault>,
}

impl<T: LiveTransport> Default for LiveLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LiveTransport> LiveLink<T> {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            transport: None,
            capturing: false,
            timeline: PlaybackTimeline::new(),
            transcript: Transcript::default(),
            fault: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn fault(&self) -> Option<&LinkFault> {
        self.fault.as_ref()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.entries()
    }

    pub fn timeline(&self) -> &PlaybackTimeline {
        &self.timeline
    }

    /// Open the link
    ///
    /// `open` acquires the microphone and the network session; the link is
    /// `Connecting` until [`on_open`](Self::on_open).
    pub fn connect<F>(&mut self, api_key: Option<&str>, open: F) -> Result<(), LinkFault>
    where
        F: FnOnce(&str) -> Result<T, LinkFault>,
    {
        let key = match api_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                self.fault = Some(LinkFault::MissingCredential);
                return Err(LinkFault::MissingCredential);
            }
        };
        if self.transport.is_some() {
            return Ok(());
        }

        self.fault = None;
        self.state = LinkState::Connecting;
        match open(key) {
            Ok(transport) => {
                self.transport = Some(transport);
                Ok(())
            }
            Err(fault) => {
                self.fail(fault.clone());
                Err(fault)
            }
        }
    }

    /// Remote side accepted the session; microphone streaming starts
    pub fn on_open(&mut self) {
        if self.transport.is_none() {
            return;
        }
        info!("Live link established");
        self.state = LinkState::Connected;
        self.capturing = true;
        self.transcript.push(TranscriptRole::System, LINK_ESTABLISHED);
    }

    /// Forward one block of microphone input
    pub fn push_microphone(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), LinkFault> {
        if !self.capturing {
            return Ok(());
        }
        let frame = encode_input_frame(samples, sample_rate);
        self.send(|t| t.send_audio(frame))
    }

    /// Queue a model audio response; returns where it was scheduled
    pub fn on_server_audio(&mut self, data: &str, now: f64) -> Option<&ScheduledClip> {
        if self.state != LinkState::Connected {
            return None;
        }
        match decode_output_frame(data) {
            Ok(samples) => Some(self.timeline.schedule(now, samples)),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable live audio");
                None
            }
        }
    }

    pub fn on_transcript(&mut self, fragment: &str) {
        if !fragment.is_empty() {
            self.transcript.push_model_fragment(fragment);
        }
    }

    pub fn release_finished(&mut self, now: f64) {
        self.timeline.release_finished(now);
    }

    /// Send the first seconds of channel 0 followed by the analysis prompt
    ///
    /// Returns false when the link is not connected.
    pub fn send_snippet(&mut self, source: &AudioBuffer) -> Result<bool, LinkFault> {
        if self.state != LinkState::Connected {
            return Ok(false);
        }
        let channel = source.channel(0).unwrap_or(&[]);
        let count = (source.sample_rate() as usize * SNIPPET_SECONDS as usize).min(channel.len());
        let frame = encode_input_frame(&channel[..count], source.sample_rate());

        self.send(|t| t.send_audio(frame))?;
        self.send(|t| t.send_text(SNIPPET_PROMPT))?;
        self.transcript.push(TranscriptRole::System, SNIPPET_COMPLETE);
        Ok(true)
    }

    /// Share an analysis report as conversation context
    pub fn share_analysis(&mut self, report: &AnalysisReport) -> Result<bool, LinkFault> {
        if self.state != LinkState::Connected {
            return Ok(false);
        }
        let message = report.context_message();
        self.send(|t| t.send_text(&message))?;
        Ok(true)
    }

    /// Transport reported an error
    pub fn on_error(&mut self, fault: LinkFault) {
        self.fail(fault);
    }

    /// Close the link and release everything it holds
    pub fn disconnect(&mut self) {
        self.teardown();
        self.state = LinkState::Disconnected;
    }

    fn send(&mut self, op: impl FnOnce(&mut T) -> Result<(), LinkFault>) -> Result<(), LinkFault> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        if let Err(fault) = op(transport) {
            self.fail(fault.clone());
            return Err(fault);
        }
        Ok(())
    }

    fn fail(&mut self, fault: LinkFault) {
        warn!(code = fault.code(), error = %fault, "Live link fault");
        self.teardown();
        self.fault = Some(fault);
        self.state = LinkState::Error;
    }

    fn teardown(&mut self) {
        self.capturing = false;
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.timeline.clear();
        if self.state != LinkState::Disconnected {
            info!("Live link closed");
            self.transcript.push(TranscriptRole::System, LINK_CLOSED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Wire {
        audio: Vec<PcmFrame>,
        text: Vec<String>,
        closed: bool,
        fail_sends: bool,
    }

    #[derive(Debug, Clone, Default)]
    struct MockTransport(Arc<Mutex<Wire>>);

    impl LiveTransport for MockTransport {
        fn send_audio(&mut self, frame: PcmFrame) -> Result<(), LinkFault> {
            let mut wire = self.0.lock().unwrap();
            if wire.fail_sends {
                return Err(LinkFault::Transport("socket closed".to_string()));
            }
            wire.audio.push(frame);
            Ok(())
        }

        fn send_text(&mut self, text: &str) -> Result<(), LinkFault> {
            self.0.lock().unwrap().text.push(text.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed = true;
        }
    }

    fn connected() -> (LiveLink<MockTransport>, MockTransport) {
        let transport = MockTransport::default();
        let mut link = LiveLink::new();
        let handle = transport.clone();
        link.connect(Some("key"), move |_| Ok(handle)).unwrap();
        link.on_open();
        (link, transport)
    }

    fn decode_frame(frame: &PcmFrame) -> Vec<i16> {
        STANDARD
            .decode(&frame.data)
            .unwrap()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    // --- framing ---

    #[test]
    fn test_input_frame_quantization() {
        let frame = encode_input_frame(&[1.0, -1.0, 0.5, 2.0], INPUT_SAMPLE_RATE);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode_frame(&frame), vec![32767, -32768, 16383, 32767]);
    }

    #[test]
    fn test_input_frame_decimation() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 1000.0).collect();
        let frame = encode_input_frame(&samples, 48_000);
        let decoded = decode_frame(&frame);

        assert_eq!(decoded.len(), 160);
        assert_eq!(decoded[1], quantize_sample(samples[3]));
        assert_eq!(decoded[10], quantize_sample(samples[30]));
    }

    #[test]
    fn test_input_frame_rounds_length() {
        // 44.1k -> 16k: ratio 2.75625, 100 / ratio = 36.28
        let frame = encode_input_frame(&[0.0; 100], 44_100);
        assert_eq!(decode_frame(&frame).len(), 36);
    }

    #[test]
    fn test_output_frame_decoding() {
        let bytes: Vec<u8> = [16384i16, -32768, 0].iter().flat_map(|s| s.to_le_bytes()).collect();
        let samples = decode_output_frame(&STANDARD.encode(bytes)).unwrap();
        assert_eq!(samples, vec![0.5, -1.0, 0.0]);
        assert!(decode_output_frame("***").is_err());
    }

    // --- timeline ---

    #[test]
    fn test_timeline_is_gapless() {
        let mut timeline = PlaybackTimeline::new();
        let first = timeline.schedule(1.0, vec![0.0; 24_000]).start_secs;
        let second = timeline.schedule(1.2, vec![0.0; 12_000]).start_secs;

        assert_eq!(first, 1.0);
        assert_eq!(second, 2.0);
        assert_eq!(timeline.next_start(), 2.5);

        // Drained queue restarts at "now"
        let third = timeline.schedule(10.0, vec![0.0; 10]).start_secs;
        assert_eq!(third, 10.0);
    }

    #[test]
    fn test_timeline_releases_finished_clips() {
        let mut timeline = PlaybackTimeline::new();
        timeline.schedule(0.0, vec![0.0; 24_000]);
        timeline.schedule(0.0, vec![0.0; 24_000]);
        timeline.release_finished(1.5);
        assert_eq!(timeline.queued().len(), 1);
    }

    // --- transcript ---

    #[test]
    fn test_model_fragments_merge() {
        let mut transcript = Transcript::default();
        transcript.push_model_fragment("Cut ");
        transcript.push_model_fragment("the lows.");
        transcript.push(TranscriptRole::System, SNIPPET_COMPLETE);
        transcript.push_model_fragment("Done");

        let entries = transcript.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "Cut the lows.");
        assert_eq!(entries[2].role, TranscriptRole::Model);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
    }

    // --- link lifecycle ---

    #[test]
    fn test_missing_credential() {
        let mut link: LiveLink<MockTransport> = LiveLink::new();
        let result = link.connect(None, |_| Ok(MockTransport::default()));
        assert_eq!(result, Err(LinkFault::MissingCredential));
        assert_eq!(link.fault().map(LinkFault::code), Some("API_KEY_NULL"));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_microphone_denied_tears_down() {
        let mut link: LiveLink<MockTransport> = LiveLink::new();
        let result = link.connect(Some("key"), |_| Err(LinkFault::MicrophoneDenied));
        assert_eq!(result, Err(LinkFault::MicrophoneDenied));
        assert_eq!(link.state(), LinkState::Error);
        assert_eq!(link.fault().map(LinkFault::code), Some("MIC_ACCESS_DENIED"));
        assert!(!link.is_capturing());
    }

    #[test]
    fn test_open_logs_and_streams_microphone() {
        let (mut link, wire) = connected();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.transcript()[0].text, LINK_ESTABLISHED);

        link.push_microphone(&[0.0; 4096], 16_000).unwrap();
        assert_eq!(wire.0.lock().unwrap().audio.len(), 1);
    }

    #[test]
    fn test_snippet_is_eight_seconds_of_channel_zero() {
        let (mut link, wire) = connected();
        let source = AudioBuffer::new(vec![vec![0.25; 16_000 * 10], vec![-0.5; 16_000 * 10]], 16_000).unwrap();

        assert!(link.send_snippet(&source).unwrap());

        let wire = wire.0.lock().unwrap();
        let samples = decode_frame(&wire.audio[0]);
        assert_eq!(samples.len(), 16_000 * 8);
        assert!(samples.iter().all(|s| *s == quantize_sample(0.25)));
        assert_eq!(wire.text, vec![SNIPPET_PROMPT.to_string()]);
        assert_eq!(link.transcript().last().unwrap().text, SNIPPET_COMPLETE);
    }

    #[test]
    fn test_share_analysis_requires_connection() {
        let report = AnalysisReport::from_json(r#"{"rms":"-12.00","peak":"-0.30","suggestion":"Add air"}"#).unwrap();

        let mut idle: LiveLink<MockTransport> = LiveLink::new();
        assert!(!idle.share_analysis(&report).unwrap());

        let (mut link, wire) = connected();
        assert!(link.share_analysis(&report).unwrap());
        assert_eq!(
            wire.0.lock().unwrap().text[0],
            "INCOMING_DNA_DATA: RMS=-12.00, Peak=-0.30. Analysis Summary: Add air"
        );
    }

    #[test]
    fn test_transport_fault_tears_down_everything() {
        let (mut link, wire) = connected();
        let response = STANDARD.encode([0u8; 4800]);
        assert!(link.on_server_audio(&response, 0.0).is_some());
        assert_eq!(link.timeline().queued().len(), 1);

        wire.0.lock().unwrap().fail_sends = true;
        let result = link.push_microphone(&[0.1; 256], 16_000);

        assert_eq!(result.map_err(|f| f.code()), Err("NEURAL_LINK_FAULT"));
        assert_eq!(link.state(), LinkState::Error);
        assert!(!link.is_capturing());
        assert!(link.timeline().queued().is_empty());
        assert!(wire.0.lock().unwrap().closed);
        assert_eq!(link.transcript().last().unwrap().text, LINK_CLOSED);
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let (mut link, wire) = connected();
        link.disconnect();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(wire.0.lock().unwrap().closed);
        assert!(link.on_server_audio("AAAA", 0.0).is_none());

        link.connect(Some("key"), |_| Ok(MockTransport::default())).unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        assert!(link.fault().is_none());
    }
}
