use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::EventType;

/// Envelope for every event channel frame.
///
/// The `payload` field uses `serde_json::value::RawValue` so the event type
/// can be inspected before the payload is decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event: EventType,
    /// Job the frame belongs to. Services that do not scope events omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl Envelope {
    /// Creates a new envelope with the given type and payload.
    pub fn new<T: Serialize>(
        event: EventType,
        job: Option<&str>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            event,
            job: job.map(str::to_owned),
            payload: raw,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Like [`parse_payload`](Self::parse_payload), but a missing payload is
    /// an error.
    pub fn require_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        self.parse_payload()?
            .ok_or_else(|| ProtocolError::MissingPayload(self.event.clone()))
    }

    /// Returns `true` if the frame is unscoped or addressed to `job_id`.
    pub fn is_for(&self, job_id: &str) -> bool {
        self.job.as_deref().is_none_or(|j| j == job_id)
    }
}
