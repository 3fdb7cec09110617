//! Voice processing module
//!
//! Audio device access, the playback buffer, and the wake word gate that
//! owns the microphone between sessions.

mod capture;
mod cpal_device;
mod device;
mod frame;
mod gate;
mod playback;
mod speaker;
mod stt;
mod wake_word;

pub use cpal_device::{CpalDevice, DeviceInfo, FALLBACK_INPUT_RATE};
pub use device::{AudioDevice, InputStream, OutputStream, StreamParams};
pub use frame::{
    AudioFormat, AudioFrame, BITS_PER_SAMPLE, f32_to_i16, i16_to_f32, pcm16_to_samples,
    samples_to_pcm16, samples_to_wav,
};
pub use gate::{GateOptions, GateState, WakeEvent, WakeWordGate};
pub use playback::{PlaybackBuffer, PlaybackConfig, Popped};
pub use stt::{DEEPGRAM_API_URL, DeepgramTranscriber, Transcriber};
pub use wake_word::{KeywordDetector, SegmentState, SpeechSegmenter, TranscriptKeywordDetector};
