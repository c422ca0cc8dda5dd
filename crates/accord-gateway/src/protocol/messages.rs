//! Gateway message envelope

use super::{HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
///
/// Every frame exchanged over the WebSocket follows this shape. `s` and `t`
/// are only populated on op 0 (Dispatch) frames from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Operation code
    pub op: OpCode,

    /// Payload data
    #[serde(default)]
    pub d: Option<Value>,

    /// Sequence number (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    // === Outbound constructors ===

    /// Heartbeat (op 1) carrying the last observed sequence, or null
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            d: Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
            s: None,
            t: None,
        }
    }

    /// Identify (op 2)
    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self {
            op: OpCode::Identify,
            d: serde_json::to_value(payload).ok(),
            s: None,
            t: None,
        }
    }

    /// Resume (op 6)
    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self {
            op: OpCode::Resume,
            d: serde_json::to_value(payload).ok(),
            s: None,
            t: None,
        }
    }

    /// Presence update (op 3)
    #[must_use]
    pub fn presence_update(data: Value) -> Self {
        Self {
            op: OpCode::PresenceUpdate,
            d: Some(data),
            s: None,
            t: None,
        }
    }

    /// Voice state update (op 4)
    #[must_use]
    pub fn voice_state_update(data: Value) -> Self {
        Self {
            op: OpCode::VoiceStateUpdate,
            d: Some(data),
            s: None,
            t: None,
        }
    }

    /// Request guild members (op 8)
    #[must_use]
    pub fn request_guild_members(data: Value) -> Self {
        Self {
            op: OpCode::RequestGuildMembers,
            d: Some(data),
            s: None,
            t: None,
        }
    }

    // === Inbound accessors ===

    /// Parse the Hello payload (op 10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Parse the READY dispatch payload
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        self.d
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Whether an INVALID_SESSION (op 9) says the session is resumable
    #[must_use]
    pub fn invalid_session_resumable(&self) -> bool {
        self.op == OpCode::InvalidSession
            && self.d.as_ref().and_then(Value::as_bool).unwrap_or(false)
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.t, self.s) {
            (Some(t), Some(s)) => write!(f, "GatewayPayload(op={}, t={t}, s={s})", self.op),
            _ => write!(f, "GatewayPayload(op={})", self.op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::Intents;

    #[test]
    fn test_heartbeat_carries_sequence_or_null() {
        let with_seq = GatewayPayload::heartbeat(Some(41));
        assert_eq!(with_seq.to_json().unwrap(), r#"{"op":1,"d":41}"#);

        let without = GatewayPayload::heartbeat(None);
        assert_eq!(without.to_json().unwrap(), r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn test_identify_wire_shape() {
        let payload = GatewayPayload::identify(&IdentifyPayload::new(
            "tok",
            Intents::GUILDS,
            Some([0, 2]),
        ));
        let json: Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert_eq!(json["op"], 2);
        assert_eq!(json["d"]["token"], "tok");
        assert_eq!(json["d"]["shard"], serde_json::json!([0, 2]));
        assert!(json.get("s").is_none());
        assert!(json.get("t").is_none());
    }

    #[test]
    fn test_resume_wire_shape() {
        let payload = GatewayPayload::resume(&ResumePayload {
            token: "tok".into(),
            session_id: "abc".into(),
            seq: 2,
        });
        let json: Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert_eq!(json["op"], 6);
        assert_eq!(json["d"]["session_id"], "abc");
        assert_eq!(json["d"]["seq"], 2);
    }

    #[test]
    fn test_parse_dispatch() {
        let payload = GatewayPayload::from_json(
            r#"{"op":0,"t":"MESSAGE_CREATE","s":7,"d":{"id":"1","content":"hi"}}"#,
        )
        .unwrap();

        assert_eq!(payload.op, OpCode::Dispatch);
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(payload.s, Some(7));
    }

    #[test]
    fn test_parse_hello() {
        let payload =
            GatewayPayload::from_json(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();
        assert_eq!(payload.as_hello().unwrap().heartbeat_interval, 45000);
        assert!(payload.as_ready().is_none());
    }

    #[test]
    fn test_parse_ready() {
        let payload = GatewayPayload::from_json(
            r#"{"op":0,"t":"READY","s":1,"d":{"v":10,"session_id":"abc","resume_gateway_url":"wss://x"}}"#,
        )
        .unwrap();
        let ready = payload.as_ready().unwrap();
        assert_eq!(ready.session_id, "abc");
    }

    #[test]
    fn test_invalid_session_resumable() {
        let resumable = GatewayPayload::from_json(r#"{"op":9,"d":true}"#).unwrap();
        assert!(resumable.invalid_session_resumable());

        let not_resumable = GatewayPayload::from_json(r#"{"op":9,"d":false}"#).unwrap();
        assert!(!not_resumable.invalid_session_resumable());

        let null_d = GatewayPayload::from_json(r#"{"op":9,"d":null}"#).unwrap();
        assert!(!null_d.invalid_session_resumable());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(GatewayPayload::from_json(r#"{"op":5,"d":null}"#).is_err());
    }
}
