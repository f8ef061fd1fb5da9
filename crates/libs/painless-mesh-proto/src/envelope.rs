//! Tagged-union envelope over JSON payloads ("Protocol variant", spec §4.C).

use std::io::Write;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::message_type::MessageType;
use crate::node_id::NodeId;
use crate::routing::Routing;

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope missing required field `{0}`")]
    MissingField(&'static str),
    #[error("payload is not the requested type: {0}")]
    WrongType(String),
}

/// A parsed envelope. Unknown message types still parse successfully (their
/// payload keys are kept opaque in `raw`), so an unrecognized type can still
/// be forwarded by the router without the local node understanding it.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub msg_type: MessageType,
    pub from: NodeId,
    pub dest: NodeId,
    pub routing: Routing,
    raw: Value,
}

impl Variant {
    pub fn new(
        msg_type: MessageType,
        from: NodeId,
        dest: NodeId,
        routing: Routing,
        payload: Value,
    ) -> Self {
        let mut object = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        object.insert("type".to_string(), Value::from(msg_type.0));
        object.insert("from".to_string(), Value::from(from.0));
        object.insert("dest".to_string(), Value::from(dest.0));
        object.insert("routing".to_string(), Value::from(routing.as_u8()));
        Variant { msg_type, from, dest, routing, raw: Value::Object(object) }
    }

    /// Parses one JSON object (already split from the wire framing) into a
    /// `Variant`. Fails only on malformed JSON or a missing/invalid
    /// `type`/`from`/`dest`/`routing` field — an unrecognized `type` value
    /// still parses fine as an opaque variant.
    pub fn parse(json: &str) -> Result<Variant, VariantError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| VariantError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Variant, VariantError> {
        let object = value.as_object().ok_or_else(|| {
            VariantError::Malformed("envelope must be a JSON object".to_string())
        })?;

        let msg_type = object
            .get("type")
            .and_then(Value::as_u64)
            .map(|v| MessageType(v as u16))
            .ok_or(VariantError::MissingField("type"))?;
        let from = object
            .get("from")
            .and_then(Value::as_u64)
            .map(|v| NodeId(v as u32))
            .ok_or(VariantError::MissingField("from"))?;
        let dest = object
            .get("dest")
            .and_then(Value::as_u64)
            .map(|v| NodeId(v as u32))
            .unwrap_or(NodeId::NONE);
        let routing = object
            .get("routing")
            .and_then(Value::as_u64)
            .and_then(|v| Routing::from_u8(v as u8))
            .or_else(|| msg_type.default_routing())
            .ok_or(VariantError::MissingField("routing"))?;

        Ok(Variant { msg_type, from, dest, routing, raw: value })
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Checked downcast of the full envelope into a caller-supplied payload
    /// type. Fails with `WrongType` rather than panicking on mismatch.
    pub fn to<T: DeserializeOwned>(&self) -> Result<T, VariantError> {
        serde_json::from_value(self.raw.clone())
            .map_err(|e| VariantError::WrongType(e.to_string()))
    }

    /// Raw JSON value backing this variant, for opaque forwarding.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn to_json_string(&self) -> String {
        self.raw.to_string()
    }

    pub fn print_to<W: Write>(&self, mut sink: W) -> std::io::Result<()> {
        serde_json::to_writer(&mut sink, &self.raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct SinglePayload {
        data: String,
    }

    #[test]
    fn round_trips_through_json_string() {
        let v = Variant::new(
            MessageType::SINGLE,
            NodeId(1),
            NodeId(2),
            Routing::Single,
            serde_json::json!({"data": "hi"}),
        );
        let s = v.to_json_string();
        let parsed = Variant::parse(&s).unwrap();
        assert_eq!(parsed.msg_type, MessageType::SINGLE);
        assert_eq!(parsed.from, NodeId(1));
        assert_eq!(parsed.dest, NodeId(2));
        assert_eq!(parsed.routing, Routing::Single);
    }

    #[test]
    fn downcast_succeeds_for_matching_shape() {
        let v = Variant::new(
            MessageType::SINGLE,
            NodeId(1),
            NodeId(2),
            Routing::Single,
            serde_json::json!({"data": "hi"}),
        );
        let payload: SinglePayload = v.to().unwrap();
        assert_eq!(payload.data, "hi");
    }

    #[test]
    fn unknown_type_still_parses_opaquely() {
        let parsed =
            Variant::parse(r#"{"type":9999,"from":1,"dest":0,"routing":2,"data":"x"}"#).unwrap();
        assert_eq!(parsed.msg_type, MessageType(9999));
        assert_eq!(parsed.routing, Routing::Broadcast);
    }

    #[test]
    fn missing_type_is_malformed() {
        assert!(Variant::parse(r#"{"from":1,"dest":0,"routing":2}"#).is_err());
    }

    #[test]
    fn routing_defaults_from_message_type_when_absent() {
        let parsed = Variant::parse(r#"{"type":4,"from":1,"dest":0,"data":"hi"}"#).unwrap();
        assert_eq!(parsed.routing, Routing::Broadcast);
    }
}
