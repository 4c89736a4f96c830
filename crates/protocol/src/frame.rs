use serde::{Deserialize, Serialize};

use crate::constants::{LifecycleEvent, MAX_FRAME_BYTES};
use crate::error::ProtocolError;

/// Envelope for everything sent over the channel.
///
/// The `data` field uses `serde_json::value::RawValue` so the payload is
/// only parsed once the event name is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Frame {
    /// Creates a frame with the given event name and payload.
    pub fn new<T: Serialize>(
        event: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => {
                let json = serde_json::to_string(d)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            event: event.into(),
            data: raw,
        })
    }

    /// Creates a lifecycle frame.
    pub fn lifecycle<T: Serialize>(
        event: LifecycleEvent,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(event.as_str(), data)
    }

    /// Returns the lifecycle event this frame carries, if any.
    pub fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        LifecycleEvent::from_name(&self.event)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Returns the payload as a JSON value (`Null` when absent).
    pub fn data_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(self.parse_data::<serde_json::Value>()?.unwrap_or_default())
    }

    /// Decodes a text message, enforcing [`MAX_FRAME_BYTES`].
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                limit: MAX_FRAME_BYTES,
            });
        }
        let frame: Frame = serde_json::from_str(text)?;
        if frame.event.is_empty() {
            return Err(ProtocolError::EmptyEventName);
        }
        Ok(frame)
    }

    /// Encodes the frame as a text message.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        if self.event.is_empty() {
            return Err(ProtocolError::EmptyEventName);
        }
        let text = serde_json::to_string(self)?;
        if text.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                limit: MAX_FRAME_BYTES,
            });
        }
        Ok(text)
    }
}

/// Payload of the `auth` frame.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

impl std::fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPayload")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Payload of the `connect` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Payload of the `connect_error` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectErrorPayload {
    #[serde(default)]
    pub message: String,
    /// `"auth"` marks a credential problem; anything else is transient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ConnectErrorPayload {
    /// Returns `true` if the server rejected the credential.
    pub fn is_auth(&self) -> bool {
        self.kind.as_deref() == Some("auth")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_new_with_payload() {
        let payload = serde_json::json!({"deviceId": "m-1"});
        let frame = Frame::new("device_status", Some(&payload)).unwrap();
        assert_eq!(frame.event, "device_status");
        assert!(frame.data.is_some());
        assert!(frame.lifecycle_event().is_none());
    }

    #[test]
    fn frame_omits_missing_data() {
        let frame = Frame::new::<()>("ping_devices", None).unwrap();
        let json = frame.encode().unwrap();
        assert_eq!(json, r#"{"event":"ping_devices"}"#);
    }

    #[test]
    fn lifecycle_frame_is_recognised() {
        let auth = AuthPayload {
            token: "secret".into(),
        };
        let frame = Frame::lifecycle(LifecycleEvent::Auth, Some(&auth)).unwrap();
        assert_eq!(frame.lifecycle_event(), Some(LifecycleEvent::Auth));
        let parsed: AuthPayload = frame.parse_data().unwrap().unwrap();
        assert_eq!(parsed.token, "secret");
    }

    #[test]
    fn auth_payload_debug_is_redacted() {
        let auth = AuthPayload {
            token: "super-secret".into(),
        };
        let dbg = format!("{auth:?}");
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn decode_rejects_oversized_text() {
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(matches!(
            Frame::decode(&huge),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn decode_rejects_empty_event() {
        assert!(matches!(
            Frame::decode(r#"{"event":""}"#),
            Err(ProtocolError::EmptyEventName)
        ));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(
            Frame::decode("not json {{"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn data_value_defaults_to_null() {
        let frame = Frame::decode(r#"{"event":"alert"}"#).unwrap();
        assert_eq!(frame.data_value().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn connect_error_kind() {
        let err: ConnectErrorPayload =
            serde_json::from_str(r#"{"message":"jwt expired","kind":"auth"}"#).unwrap();
        assert!(err.is_auth());

        let err: ConnectErrorPayload = serde_json::from_str(r#"{"message":"busy"}"#).unwrap();
        assert!(!err.is_auth());
    }

    #[test]
    fn connected_payload_camel_case() {
        let p = ConnectedPayload {
            session_id: Some("abc".into()),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"sessionId\""));
    }
}
