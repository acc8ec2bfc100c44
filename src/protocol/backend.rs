//! Backend realtime events.
//!
//! Only the variants the relay produces or consumes are modelled. Anything
//! else the backend emits is classified by its `type` tag through
//! [`event_type`] and never fully decoded.

use serde::{Deserialize, Serialize};

pub const RESPONSE_AUDIO_DELTA: &str = "response.audio.delta";

/// A backend event the relay knows how to build or read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendEvent {
    /// Session configuration, sent once right after the socket opens
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParameters },

    /// One chunk of caller audio
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// One chunk of synthesized audio for the caller
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
}

/// Body of `session.update`.
///
/// `input_audio_transcription` is always serialized, as `null` when disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: Option<TranscriptionParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionParameters {
    pub model: String,
}

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
}

/// Read just the `type` tag of a raw backend frame.
pub fn event_type(raw: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str::<EventEnvelope>(raw).map(|envelope| envelope.event_type)
}
