//! Protocol message types and their JSON wire codec.
//!
//! Two messages are tagged objects. A state update is the bare value, so a
//! frame is an update unless it is an object whose `type` field names one of
//! the protocol tags.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::types::StateValue;

/// Tag of the initial-value request.
pub const ASK_INIT_VALUE: &str = "ASK_INIT_VALUE";

/// Tag of the initial-value reply.
pub const RETURN_INIT_VALUE: &str = "RETURN_INIT_VALUE";

/// Messages broadcast between peers of one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A peer changed the value. Last one received wins.
    StateUpdate(StateValue),

    /// Request for the current value.
    AskInitValue {
        /// Any peer holding a value may answer, not only the leader.
        force: bool,
    },

    /// Reply carrying the sender's current value.
    ReturnInitValue {
        /// The value being offered.
        state: StateValue,
    },
}

/// Discriminant of a [`Message`], handy for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    StateUpdate,
    AskInitValue,
    ReturnInitValue,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::StateUpdate => f.write_str("STATE_UPDATE"),
            MessageKind::AskInitValue => f.write_str(ASK_INIT_VALUE),
            MessageKind::ReturnInitValue => f.write_str(RETURN_INIT_VALUE),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StateUpdate(_) => MessageKind::StateUpdate,
            Message::AskInitValue { .. } => MessageKind::AskInitValue,
            Message::ReturnInitValue { .. } => MessageKind::ReturnInitValue,
        }
    }

    /// Convert to the JSON shape sent on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            Message::StateUpdate(value) => value.clone(),
            Message::AskInitValue { force } => {
                let mut obj = Map::new();
                obj.insert("type".into(), Value::from(ASK_INIT_VALUE));
                obj.insert("force".into(), Value::Bool(*force));
                Value::Object(obj)
            }
            Message::ReturnInitValue { state } => {
                let mut obj = Map::new();
                obj.insert("type".into(), Value::from(RETURN_INIT_VALUE));
                obj.insert("state".into(), state.clone());
                Value::Object(obj)
            }
        }
    }

    /// Interpret a wire value.
    ///
    /// `force` may be absent (older followers omit it) and then reads as
    /// `false`. A reply without `state` is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        let tag = match reserved_tag(&value) {
            Some(tag) => tag,
            None => return Ok(Message::StateUpdate(value)),
        };

        let Value::Object(mut obj) = value else {
            return Err(CoreError::InvalidMessage("tagged message is not an object".into()));
        };

        match tag {
            ASK_INIT_VALUE => {
                let force = match obj.remove("force") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(force)) => force,
                    Some(other) => {
                        return Err(CoreError::InvalidMessage(format!(
                            "`force` must be a boolean, got {}",
                            other
                        )))
                    }
                };
                Ok(Message::AskInitValue { force })
            }
            _ => {
                let state = obj.remove("state").ok_or(CoreError::MissingField("state"))?;
                Ok(Message::ReturnInitValue { state })
            }
        }
    }

    /// Encode to a JSON frame.
    ///
    /// Fails with [`CoreError::ReservedTag`] for an update whose value would
    /// read back as a tagged message.
    pub fn encode(&self) -> Result<String> {
        if let Message::StateUpdate(value) = self {
            Self::check_update(value)?;
        }
        Ok(serde_json::to_string(&self.to_value())?)
    }

    /// Check that `value` can travel as a state update.
    ///
    /// An object whose `type` field is a protocol tag would be read back as
    /// that message, so it fails with [`CoreError::ReservedTag`].
    pub fn check_update(value: &StateValue) -> Result<()> {
        match reserved_tag(value) {
            Some(tag) => Err(CoreError::ReservedTag(tag.to_string())),
            None => Ok(()),
        }
    }

    /// Decode a JSON frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(value)
    }
}

/// Returns the protocol tag if `value` is an object whose `type` names one.
fn reserved_tag(value: &Value) -> Option<&'static str> {
    match value.get("type").and_then(Value::as_str) {
        Some(ASK_INIT_VALUE) => Some(ASK_INIT_VALUE),
        Some(RETURN_INIT_VALUE) => Some(RETURN_INIT_VALUE),
        _ => None,
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(D::Error::custom)
    }
}
