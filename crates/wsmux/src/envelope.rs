//! Wire envelope codec
//!
//! Every frame on the wire is a JSON object `{ tag, message?, error?, data? }`.
//! `tag` names the logical stream the frame belongs to. A frame carrying
//! `error` is a failure notification for that tag and is never treated as a
//! regular payload, even if it also carries `message`.

use crate::error::ApplicationError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tagged unit of wire communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Envelope contents after classification
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Regular payload for a tag stream
    Message { tag: String, message: Value },
    /// Failure notification for a tag
    Error(ApplicationError),
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Envelope tag is empty")]
    EmptyTag,

    #[error("Envelope for tag {tag} carries neither message nor error")]
    MissingBody { tag: String },
}

// `"message": null` is still a message, so presence is tracked separately from the value.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Build a success-path envelope
    pub fn message(tag: impl Into<String>, message: Value) -> Self {
        Self {
            tag: tag.into(),
            message: Some(message),
            error: None,
            data: None,
        }
    }

    /// Build a failure notification
    pub fn error(tag: impl Into<String>, error: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            tag: tag.into(),
            message: None,
            error: Some(error.into()),
            data,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serialize to the text frame sent on the wire
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        if self.tag.is_empty() {
            return Err(EnvelopeError::EmptyTag);
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame received from the wire
    pub fn decode(frame: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        if envelope.tag.is_empty() {
            return Err(EnvelopeError::EmptyTag);
        }
        Ok(envelope)
    }

    /// Split the envelope into a tag payload or an application error
    pub fn into_payload(self) -> Result<Payload, EnvelopeError> {
        match (self.error, self.message) {
            (Some(error), _) => Ok(Payload::Error(ApplicationError {
                tag: self.tag,
                error,
                data: self.data,
            })),
            (None, Some(message)) => Ok(Payload::Message {
                tag: self.tag,
                message,
            }),
            (None, None) => Err(EnvelopeError::MissingBody { tag: self.tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_outbound_message() {
        let frame = Envelope::message("auth", json!({"user_name": "bob"}))
            .encode()
            .unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, json!({"tag": "auth", "message": {"user_name": "bob"}}));
    }

    #[test]
    fn test_encode_rejects_empty_tag() {
        let result = Envelope::message("", json!(1)).encode();
        assert!(matches!(result, Err(EnvelopeError::EmptyTag)));
    }

    #[test]
    fn test_decode_message_envelope() {
        let envelope = Envelope::decode(r#"{"tag":"greeting","message":{"n":1}}"#).unwrap();
        assert_eq!(
            envelope.into_payload().unwrap(),
            Payload::Message {
                tag: "greeting".to_string(),
                message: json!({"n": 1}),
            }
        );
    }

    #[test]
    fn test_decode_error_envelope_keeps_tag_and_data() {
        let envelope =
            Envelope::decode(r#"{"tag":"auth-error","error":"wrong name admin","data":null}"#)
                .unwrap();
        assert!(envelope.is_error());
        match envelope.into_payload().unwrap() {
            Payload::Error(err) => {
                assert_eq!(err.tag, "auth-error");
                assert_eq!(err.error, "wrong name admin");
                assert_eq!(err.data, None);
            }
            other => panic!("expected error payload, got {other:?}"),
        }
    }

    #[test]
    fn test_error_wins_over_message() {
        let envelope =
            Envelope::decode(r#"{"tag":"kick","message":{"x":1},"error":"kicked"}"#).unwrap();
        assert!(matches!(
            envelope.into_payload().unwrap(),
            Payload::Error(ApplicationError { .. })
        ));
    }

    #[test]
    fn test_null_message_is_still_a_message() {
        let envelope = Envelope::decode(r#"{"tag":"hat-fill-end","message":null}"#).unwrap();
        assert_eq!(envelope.message, Some(Value::Null));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"message":1}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"tag":"","message":1}"#),
            Err(EnvelopeError::EmptyTag)
        ));
        let bodyless = Envelope::decode(r#"{"tag":"state"}"#).unwrap();
        assert!(matches!(
            bodyless.into_payload(),
            Err(EnvelopeError::MissingBody { .. })
        ));
    }
}
