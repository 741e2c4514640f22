use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Numeric tag carried in the `Type` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    ChapterUploaded = 0,
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(EventType::ChapterUploaded),
            other => Err(D::Error::custom(format!("unknown event type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterUploadedPayload {
    #[serde(rename = "BookId")]
    pub book_id: Uuid,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    ChapterUploaded(ChapterUploadedPayload),
}

#[derive(Serialize)]
struct OutboundFrame<'a, P> {
    #[serde(rename = "Type")]
    kind: EventType,
    #[serde(rename = "Payload")]
    payload: &'a P,
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "Type")]
    kind: EventType,
    #[serde(rename = "Payload")]
    payload: serde_json::Value,
}

impl HubEvent {
    pub fn chapter_uploaded(book_id: Uuid, message: impl Into<String>) -> Self {
        HubEvent::ChapterUploaded(ChapterUploadedPayload {
            book_id,
            message: message.into(),
        })
    }

    pub fn kind(&self) -> EventType {
        match self {
            HubEvent::ChapterUploaded(_) => EventType::ChapterUploaded,
        }
    }

    /// Renders the `{"Type": n, "Payload": {...}}` text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            HubEvent::ChapterUploaded(payload) => serde_json::to_string(&OutboundFrame {
                kind: self.kind(),
                payload,
            }),
        }
    }

    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        match frame.kind {
            EventType::ChapterUploaded => Ok(HubEvent::ChapterUploaded(serde_json::from_value(
                frame.payload,
            )?)),
        }
    }
}
