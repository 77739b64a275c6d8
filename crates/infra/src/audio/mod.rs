//! Platform audio backends
//!
//! - [`output`]: cpal output stream driving the mastering engine (WASAPI,
//!   ALSA/PulseAudio, CoreAudio)
//! - [`decode`]: WAV decoding with hound and resampling to the engine rate
//!   with rubato

pub mod decode;
pub mod output;

pub use decode::{decode_file, decode_reader, resample};
pub use output::{output_device_names, OutputStream};
