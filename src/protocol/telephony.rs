//! Telephony media-stream frames.
//!
//! Inbound frames are decoded in two stages: the `{event, streamSid}` header
//! first, then the `media` object only when the event is `media`. Control
//! frames such as `connected`, `stop` or `mark` carry differently shaped
//! bodies and are accepted without looking at them.

use serde::{Deserialize, Serialize};

/// Classification of a frame's `event` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelephonyEvent {
    /// Call leg started; carries the stream id to bind
    Start,
    /// One audio chunk
    Media,
    /// Anything else (connected, stop, mark, dtmf, ...)
    Other,
}

/// A telephony frame, as received from or sent to the client channel.
///
/// Outbound frames only carry `event`, `streamSid` and `media.payload`;
/// the remaining media fields are omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelephonyFrame {
    pub event: String,
    #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<TelephonyMedia>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelephonyMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Base64 audio, opaque to the relay
    pub payload: String,
}

#[derive(Deserialize)]
struct FrameHeader {
    event: String,
    #[serde(rename = "streamSid", default)]
    stream_sid: Option<String>,
}

#[derive(Deserialize)]
struct MediaBody {
    media: TelephonyMedia,
}

impl TelephonyFrame {
    /// Decode an inbound frame from an already-parsed JSON body.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let header: FrameHeader = serde_json::from_value(value.clone())?;
        let media = if classify(&header.event) == TelephonyEvent::Media {
            Some(serde_json::from_value::<MediaBody>(value)?.media)
        } else {
            None
        };

        Ok(Self {
            event: header.event,
            stream_sid: header.stream_sid,
            media,
        })
    }

    /// Build an outbound media frame for the given stream.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: "media".to_string(),
            stream_sid: Some(stream_sid.into()),
            media: Some(TelephonyMedia {
                track: None,
                chunk: None,
                timestamp: None,
                payload: payload.into(),
            }),
        }
    }

    pub fn kind(&self) -> TelephonyEvent {
        classify(&self.event)
    }
}

fn classify(event: &str) -> TelephonyEvent {
    match event {
        "start" => TelephonyEvent::Start,
        "media" => TelephonyEvent::Media,
        _ => TelephonyEvent::Other,
    }
}
