//! Pure conversions between telephony frames and backend events.
//!
//! The translator owns nothing but the session persona handed to it at
//! construction time, so one instance is shared by every session.

use super::backend::{BackendEvent, SessionParameters, TranscriptionParameters};
use super::telephony::{TelephonyEvent, TelephonyFrame};
use crate::config::SessionConfig;

#[derive(Debug, Clone)]
pub struct Translator {
    parameters: SessionParameters,
}

impl Translator {
    pub fn new(parameters: SessionParameters) -> Self {
        Self { parameters }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(SessionParameters {
            instructions: config.instructions.clone(),
            input_audio_format: config.input_audio_format.clone(),
            output_audio_format: config.output_audio_format.clone(),
            input_audio_transcription: config
                .transcription_model
                .as_ref()
                .map(|model| TranscriptionParameters { model: model.clone() }),
        })
    }

    /// The `session.update` event sent once per backend connection.
    pub fn configure_session(&self) -> BackendEvent {
        BackendEvent::SessionUpdate {
            session: self.parameters.clone(),
        }
    }

    /// Caller audio → `input_audio_buffer.append`. `None` for non-media frames.
    pub fn telephony_to_backend(&self, frame: &TelephonyFrame) -> Option<BackendEvent> {
        if frame.kind() != TelephonyEvent::Media {
            return None;
        }
        frame.media.as_ref().map(|media| BackendEvent::InputAudioBufferAppend {
            audio: media.payload.clone(),
        })
    }

    /// `response.audio.delta` → outbound media frame on `stream_sid`.
    /// Every other backend event yields `None`.
    pub fn backend_to_telephony(&self, event: &BackendEvent, stream_sid: &str) -> Option<TelephonyFrame> {
        match event {
            BackendEvent::ResponseAudioDelta { delta } => Some(TelephonyFrame::media(stream_sid, delta.clone())),
            _ => None,
        }
    }
}
