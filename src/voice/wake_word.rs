//! Keyword detection
//!
//! Uses a hybrid approach: a local energy segmenter finds short utterances
//! and a transcriber confirms whether one of them is a wake word.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::frame::samples_to_wav;
use super::stt::{DeepgramTranscriber, Transcriber};
use crate::config::WakeConfig;
use crate::{Error, Result};

/// Minimum speech before a segment counts, in seconds
const MIN_SPEECH_SECS: f32 = 0.3;

/// Trailing silence that ends a segment, in seconds
const SILENCE_SECS: f32 = 0.5;

/// Longest segment sent for confirmation, in seconds
const MAX_SEGMENT_SECS: f32 = 3.0;

/// Frame-by-frame keyword spotter driven by the wake word gate
#[async_trait]
pub trait KeywordDetector: Send {
    /// Rate the detector expects its frames at
    fn sample_rate(&self) -> u32;

    /// Samples per frame
    fn frame_length(&self) -> usize;

    fn keywords(&self) -> &[String];

    /// Feed one mono frame; returns the index of a detected keyword
    ///
    /// # Errors
    ///
    /// Returns error if inference fails; the gate logs it and keeps scanning
    async fn process(&mut self, frame: &[i16]) -> Result<Option<usize>>;

    /// Drop any partial state, e.g. when the gate releases the microphone
    fn reset(&mut self);
}

/// State of the speech segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Listening,
}

/// Splits a sample stream into utterances by RMS energy
pub struct SpeechSegmenter {
    threshold: f32,
    min_speech: usize,
    silence: usize,
    max_segment: usize,
    state: SegmentState,
    buffer: Vec<i16>,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Sensitivity in [0, 1] maps to an energy threshold; higher is more sensitive
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(sample_rate: u32, sensitivity: f32) -> Self {
        let rate = sample_rate as f32;
        Self {
            threshold: 0.06f32.mul_add(1.0 - sensitivity.clamp(0.0, 1.0), 0.005),
            min_speech: (rate * MIN_SPEECH_SECS) as usize,
            silence: (rate * SILENCE_SECS) as usize,
            max_segment: (rate * MAX_SEGMENT_SECS) as usize,
            state: SegmentState::Idle,
            buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    /// Feed samples; returns a finished utterance
    pub fn push(&mut self, samples: &[i16]) -> Option<Vec<i16>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmentState::Idle => {
                if is_speech {
                    self.state = SegmentState::Listening;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
                None
            }
            SegmentState::Listening => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let complete =
                    self.silence_counter > self.silence && self.buffer.len() > self.min_speech;
                if complete || self.buffer.len() >= self.max_segment {
                    tracing::debug!(samples = self.buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.buffer);
                    self.reset();
                    return Some(segment);
                }

                // Too much silence without enough speech
                if self.silence_counter > self.silence * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

/// Keyword detector confirming segmented speech through a transcriber
pub struct TranscriptKeywordDetector {
    keywords: Vec<String>,
    normalized: Vec<String>,
    segmenter: SpeechSegmenter,
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    frame_length: usize,
}

impl TranscriptKeywordDetector {
    /// Create a detector for `keywords`
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeWord` if no usable keyword is given
    pub fn new(
        keywords: Vec<String>,
        sensitivity: f32,
        sample_rate: u32,
        frame_length: usize,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(Error::WakeWord("no wake keywords configured".to_string()));
        }
        if frame_length == 0 || sample_rate == 0 {
            return Err(Error::WakeWord(
                "frame length and sample rate must be non-zero".to_string(),
            ));
        }

        let normalized = keywords.iter().map(|k| normalize_words(k)).collect();
        tracing::debug!(keywords = ?keywords, sensitivity, "wake word detector initialized");

        Ok(Self {
            keywords,
            normalized,
            segmenter: SpeechSegmenter::new(sample_rate, sensitivity),
            transcriber,
            sample_rate,
            frame_length,
        })
    }

    /// Build the Deepgram-backed detector from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeWord` if the API key is missing or the detector
    /// cannot be constructed
    pub fn from_config(config: &WakeConfig, api_key: Option<&SecretString>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            Error::WakeWord("DEEPGRAM_API_KEY is required for wake word detection".to_string())
        })?;
        let transcriber = DeepgramTranscriber::new(
            SecretString::from(api_key.expose_secret().to_string()),
            config.stt_model.clone(),
        )
        .map_err(|e| Error::WakeWord(e.to_string()))?;

        Self::new(
            config.keywords.clone(),
            config.sensitivity,
            config.sample_rate,
            config.frame_length,
            Arc::new(transcriber),
        )
    }

    /// Index of the first keyword contained in `transcript`
    #[must_use]
    pub fn match_keyword(&self, transcript: &str) -> Option<usize> {
        let heard = format!(" {} ", normalize_words(transcript));
        self.normalized
            .iter()
            .position(|k| heard.contains(&format!(" {k} ")))
    }
}

#[async_trait]
impl KeywordDetector for TranscriptKeywordDetector {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        let Some(segment) = self.segmenter.push(frame) else {
            return Ok(None);
        };

        let wav = samples_to_wav(&segment, self.sample_rate)?;
        let transcript = self.transcriber.transcribe(&wav).await?;
        let found = self.match_keyword(&transcript);
        if let Some(index) = found {
            tracing::info!(wake_word = %self.keywords[index], transcript, "wake word detected");
        } else {
            tracing::debug!(transcript, "no wake word in segment");
        }
        Ok(found)
    }

    fn reset(&mut self) {
        self.segmenter.reset();
    }
}

/// Lower-case words with punctuation removed, single-space separated
fn normalize_words(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate RMS energy of samples, normalized to [0, 1]
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
