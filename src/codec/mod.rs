//! Capture transport and container codecs
//!
//! `pcm` converts captured float samples into the 16-bit transport format;
//! `wav` reads PCM16 track containers and writes take recordings.

pub mod pcm;
pub mod wav;

pub use pcm::{CaptureEncoder, CaptureFrame, CaptureStats, CAPTURE_FRAME_WIRE_LEN};
pub use wav::{decode_wav_pcm16, downmix_to_mono, DecodedTrack, TakeWriter};
