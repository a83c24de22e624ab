//! WAV container load and take persistence
//!
//! Track input is a standard uncompressed linear-PCM WAV with 16-bit
//! samples; anything else is rejected without mutating engine state. Take
//! recordings are written through `hound`, which patches the provisional
//! header size fields when the writer is finalized.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use crate::error::FormatError;

/// A decoded track: interleaved float samples plus layout.
pub struct DecodedTrack {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedTrack {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Decode a PCM16 WAV from memory into interleaved f32 samples.
///
/// Only 16-bit integer PCM is accepted. Samples are scaled by 1/32768.
pub fn decode_wav_pcm16(bytes: &[u8]) -> Result<DecodedTrack, FormatError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| FormatError::Malformed(e.to_string()))?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(FormatError::UnsupportedEncoding(format!(
            "expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(FormatError::Malformed(
            "zero channel count or sample rate".into(),
        ));
    }

    let samples: Result<Vec<f32>, _> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect();
    let samples = samples.map_err(|e| FormatError::Malformed(e.to_string()))?;

    Ok(DecodedTrack {
        samples,
        channels: spec.channels as usize,
        sample_rate: spec.sample_rate,
    })
}

/// Average an interleaved buffer down to mono.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Persistence sink for direct-to-storage take recording.
///
/// Wraps a buffered `hound` writer; the WAV header's size fields stay
/// provisional until `finalize` rewrites them with the real byte count.
pub struct TakeWriter {
    writer: hound::WavWriter<BufWriter<File>>,
    frames_written: u64,
}

impl TakeWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, FormatError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| FormatError::WriteFailed(e.to_string()))?;
        Ok(Self {
            writer,
            frames_written: 0,
        })
    }

    /// Append a little-endian PCM16 payload as produced by the capture
    /// encoder.
    pub fn append_payload(&mut self, payload: &[u8], channels: u32) -> Result<(), FormatError> {
        for pair in payload.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            self.writer
                .write_sample(sample)
                .map_err(|e| FormatError::WriteFailed(e.to_string()))?;
        }
        if channels > 0 {
            self.frames_written += (payload.len() as u64 / 2) / channels as u64;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and rewrite the header size fields.
    pub fn finalize(self) -> Result<(), FormatError> {
        self.writer
            .finalize()
            .map_err(|e| FormatError::WriteFailed(e.to_string()))
    }
}
