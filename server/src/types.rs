//! Wire protocol types for the alert fan-out.
//!
//! Covers: identify, joinRoomLegacy, sendGenericNotification, the
//! diagnostic queries, and the server-side notification/newAlarm events.
//! Field names stay in the original Spanish wire contract (mensaje,
//! emisor, vecindarioId, ...) so existing mobile clients keep working.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════
// Identities
// ═══════════════════════════════════════════════════════════════

/// Opaque per-connection identity, assigned at upgrade time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User identity as seen on the wire. Clients send either a JSON string
/// or a number; both normalize to the string form. Ordered so member
/// snapshots come out deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<i32> for UserId {
    fn from(n: i32) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(StringOrNumber::deserialize(deserializer)?.into_string()))
    }
}

/// Neighborhood identity. Accepts string or number on input; serializes
/// back as a JSON number when the id is numeric (the backend uses
/// integer ids, but legacy clients send strings).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeighborhoodId(pub String);

impl fmt::Display for NeighborhoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NeighborhoodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<i32> for NeighborhoodId {
    fn from(n: i32) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for NeighborhoodId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<i64>() {
            Ok(n) => serializer.serialize_i64(n),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for NeighborhoodId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(StringOrNumber::deserialize(deserializer)?.into_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(i64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Num(n) => n.to_string(),
        }
    }
}

/// Transport room key for a neighborhood. The one place the mapping from
/// neighborhood identity to room identity is defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn for_neighborhood(id: &NeighborhoodId) -> Self {
        Self(format!("vecindario_{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════
// Notification payload
// ═══════════════════════════════════════════════════════════════

/// Closed set of notification type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Alarma,
    Info,
    Success,
    Warning,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alarma => "alarma",
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
        }
    }

    /// Parse a wire tag. Unknown tags collapse to `Info` — old clients
    /// send a few ad-hoc strings ("alerta" among them) that were all
    /// rendered as plain notices.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "alarma" => Self::Alarma,
            "success" => Self::Success,
            "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

impl Serialize for NotificationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Summary of a persisted alarm embedded in alarm-typed payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSummary {
    pub id: i32,
    pub tipo: String,
    pub descripcion: String,
    #[serde(rename = "fechaHora")]
    pub fecha_hora: DateTime<Utc>,
}

/// The transient payload broadcast to a room. Constructed once per
/// dispatch, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub mensaje: String,
    pub tipo: NotificationKind,
    pub emisor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "vecindarioId")]
    pub vecindario_id: NeighborhoodId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alarma: Option<AlarmSummary>,
}

// ═══════════════════════════════════════════════════════════════
// Client → Server messages
// ═══════════════════════════════════════════════════════════════

/// Top-level envelope from a client. The `event` field dispatches.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Bind this session to a (user, neighborhood) pair.
    #[serde(rename_all = "camelCase")]
    Identify {
        user_id: UserId,
        vecindario_id: NeighborhoodId,
    },
    /// Join a neighborhood room without registry accounting.
    /// Kept for old clients that never send identify.
    #[serde(rename_all = "camelCase")]
    JoinRoomLegacy { vecindario_id: NeighborhoodId },
    /// Broadcast a generic notice to a neighborhood.
    SendGenericNotification {
        sala: NeighborhoodId,
        mensaje: String,
        #[serde(default)]
        tipo: Option<String>,
        #[serde(default)]
        emisor: Option<String>,
    },
    /// Request the connected-sessions snapshot.
    GetClients,
    /// Request the identified members of one neighborhood.
    #[serde(rename_all = "camelCase")]
    GetRoomMembers { vecindario_id: NeighborhoodId },
}

// ═══════════════════════════════════════════════════════════════
// Server → Client messages
// ═══════════════════════════════════════════════════════════════

/// Connected-session entry in the `update-clients` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: SessionId,
}

/// Top-level envelope to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    Notification(NotificationPayload),
    NewAlarm(NotificationPayload),
    #[serde(rename = "update-clients")]
    UpdateClients { clients: Vec<ClientInfo> },
    #[serde(rename_all = "camelCase")]
    RoomMembers {
        vecindario_id: NeighborhoodId,
        members: Vec<UserId>,
    },
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_key_is_deterministic() {
        let n = NeighborhoodId::from("7");
        assert_eq!(RoomKey::for_neighborhood(&n).as_str(), "vecindario_7");
        assert_eq!(
            RoomKey::for_neighborhood(&n),
            RoomKey::for_neighborhood(&NeighborhoodId::from(7))
        );
    }

    #[test]
    fn neighborhood_id_accepts_string_or_number() {
        let a: NeighborhoodId = serde_json::from_value(json!("7")).unwrap();
        let b: NeighborhoodId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(a, b);
        // Numeric ids serialize back as JSON numbers.
        assert_eq!(serde_json::to_value(&a).unwrap(), json!(7));
        let c: NeighborhoodId = serde_json::from_value(json!("centro")).unwrap();
        assert_eq!(serde_json::to_value(&c).unwrap(), json!("centro"));
    }

    #[test]
    fn identify_parses() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "identify",
            "userId": 42,
            "vecindarioId": "7",
        }))
        .unwrap();
        match msg {
            ClientMessage::Identify {
                user_id,
                vecindario_id,
            } => {
                assert_eq!(user_id, UserId::from("42"));
                assert_eq!(vecindario_id, NeighborhoodId::from("7"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn generic_notification_defaults() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "sendGenericNotification",
            "sala": 3,
            "mensaje": "corte de luz",
        }))
        .unwrap();
        match msg {
            ClientMessage::SendGenericNotification { tipo, emisor, .. } => {
                assert!(tipo.is_none());
                assert!(emisor.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_collapses_to_info() {
        assert_eq!(NotificationKind::parse("alerta"), NotificationKind::Info);
        assert_eq!(NotificationKind::parse("alarma"), NotificationKind::Alarma);
    }

    #[test]
    fn update_clients_event_name() {
        let msg = ServerMessage::UpdateClients { clients: vec![] };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["event"], "update-clients");
    }

    #[test]
    fn payload_skips_absent_alarm_summary() {
        let payload = NotificationPayload {
            mensaje: "test".into(),
            tipo: NotificationKind::Info,
            emisor: "Usuario".into(),
            timestamp: Utc::now(),
            vecindario_id: NeighborhoodId::from(3),
            alarma: None,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert!(v.get("alarma").is_none());
        assert_eq!(v["vecindarioId"], json!(3));
    }
}
