//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{Map, Value};

use crosstab_core::{ChannelKey, Message, PeerId, StateValue};

/// Generate a random PeerId.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    any::<[u8; 16]>().prop_map(PeerId::from_bytes)
}

/// Generate a non-empty channel key.
pub fn channel_key() -> impl Strategy<Value = ChannelKey> {
    "[a-z][a-z0-9:-]{0,23}".prop_filter_map("empty key", |s| ChannelKey::new(s).ok())
}

/// Generate a JSON leaf. Numbers are integers so values compare exactly.
pub fn scalar() -> impl Strategy<Value = StateValue> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::String),
    ]
}

/// Generate a nested JSON value.
///
/// Object keys never include `type`, so generated values are always valid
/// state updates.
pub fn state_value() -> impl Strategy<Value = StateValue> {
    scalar().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6).prop_map(|entries| {
                let map: Map<String, Value> = entries
                    .into_iter()
                    .filter(|(key, _)| key != "type")
                    .collect();
                Value::Object(map)
            }),
        ]
    })
}

/// Generate any protocol message.
pub fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        state_value().prop_map(Message::StateUpdate),
        any::<bool>().prop_map(|force| Message::AskInitValue { force }),
        state_value().prop_map(|state| Message::ReturnInitValue { state }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_messages_encode(msg in message()) {
            let frame = msg.encode().unwrap();
            prop_assert_eq!(Message::decode(&frame).unwrap(), msg);
        }

        #[test]
        fn generated_keys_are_valid(key in channel_key()) {
            prop_assert!(!key.as_str().is_empty());
        }
    }
}
