//! Forge host integration: audio output and file decoding

pub mod audio;
