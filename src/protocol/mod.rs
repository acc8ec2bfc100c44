//! # Wire Protocols
//!
//! The relay speaks two JSON dialects and converts between them:
//! - **backend**: realtime speech events tagged by `type` (`session.update`,
//!   `input_audio_buffer.append`, `response.audio.delta`, ...)
//! - **telephony**: media-stream frames tagged by `event` (`start`, `media`, ...)
//!
//! Audio payloads are base64 strings in both dialects and are moved across
//! unchanged. The codec is negotiated up front through `session.update`.

pub mod backend;
pub mod telephony;
pub mod translator;

pub use backend::BackendEvent;
pub use telephony::{TelephonyEvent, TelephonyFrame};
pub use translator::Translator;
