//! Notification dispatcher — the single code path from a business event
//! to a room broadcast.
//!
//! Callers construct an [`AlertEvent`]; only [`dispatch`] performs I/O.
//! An alarm event always goes out as `newAlarm`; a notice always goes
//! out as `notification`. A notice carrying the alarm type tag is
//! refused, so the alarm-creation path stays the only emitter of alarm
//! broadcasts and no business event is ever double-sent.

use chrono::Utc;

use crate::error::AlertError;
use crate::rooms::Hub;
use crate::types::{
    AlarmSummary, NeighborhoodId, NotificationKind, NotificationPayload, ServerMessage,
};

/// One real-world event to broadcast.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    /// A persisted alarm. Carries the summary embedded in the payload.
    Alarm {
        neighborhood: NeighborhoodId,
        emitter: String,
        mensaje: String,
        summary: AlarmSummary,
    },
    /// A generic notice (info/success/warning).
    Notice {
        neighborhood: NeighborhoodId,
        emitter: String,
        mensaje: String,
        kind: NotificationKind,
    },
}

impl AlertEvent {
    pub fn neighborhood(&self) -> &NeighborhoodId {
        match self {
            Self::Alarm { neighborhood, .. } | Self::Notice { neighborhood, .. } => neighborhood,
        }
    }
}

/// Broadcast one event to its neighborhood room. Returns the number of
/// sessions reached; zero members is a successful no-op.
pub fn dispatch(hub: &Hub, event: AlertEvent) -> Result<usize, AlertError> {
    match event {
        AlertEvent::Alarm {
            neighborhood,
            emitter,
            mensaje,
            summary,
        } => {
            let payload = NotificationPayload {
                mensaje,
                tipo: NotificationKind::Alarma,
                emisor: emitter,
                timestamp: Utc::now(),
                vecindario_id: neighborhood.clone(),
                alarma: Some(summary),
            };
            Ok(hub.broadcast_to_room(&neighborhood, ServerMessage::NewAlarm(payload)))
        }
        AlertEvent::Notice {
            neighborhood,
            emitter,
            mensaje,
            kind,
        } => {
            if kind == NotificationKind::Alarma {
                // Alarms are emitted exclusively by the alarm-creation
                // path; an alarm-typed notice would double-send.
                return Err(AlertError::Dispatch(format!(
                    "alarm-typed notice for vecindario {neighborhood} suppressed"
                )));
            }
            let payload = NotificationPayload {
                mensaje,
                tipo: kind,
                emisor: emitter,
                timestamp: Utc::now(),
                vecindario_id: neighborhood.clone(),
                alarma: None,
            };
            Ok(hub.broadcast_to_room(&neighborhood, ServerMessage::Notification(payload)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionId, UserId};
    use tokio::sync::mpsc;

    fn bound_session(hub: &Hub, user: &str, n: &NeighborhoodId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(8);
        hub.identify(SessionId::new(), tx, UserId::from(user), n.clone());
        rx
    }

    fn summary() -> AlarmSummary {
        AlarmSummary {
            id: 1,
            tipo: "incendio".into(),
            descripcion: "fuego".into(),
            fecha_hora: Utc::now(),
        }
    }

    #[test]
    fn alarm_event_emits_new_alarm() {
        let hub = Hub::new();
        let three = NeighborhoodId::from(3);
        let mut rx = bound_session(&hub, "5", &three);

        let delivered = dispatch(
            &hub,
            AlertEvent::Alarm {
                neighborhood: three.clone(),
                emitter: "Ana García".into(),
                mensaje: "fuego".into(),
                summary: summary(),
            },
        )
        .unwrap();
        assert_eq!(delivered, 1);

        match rx.try_recv().unwrap() {
            ServerMessage::NewAlarm(p) => {
                assert_eq!(p.tipo, NotificationKind::Alarma);
                assert_eq!(p.emisor, "Ana García");
                assert_eq!(p.vecindario_id, three);
                assert_eq!(p.alarma.unwrap().tipo, "incendio");
            }
            other => panic!("expected newAlarm, got {other:?}"),
        }
    }

    #[test]
    fn notice_emits_notification_without_summary() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let mut rx = bound_session(&hub, "1", &seven);

        dispatch(
            &hub,
            AlertEvent::Notice {
                neighborhood: seven.clone(),
                emitter: "Usuario".into(),
                mensaje: "corte de luz".into(),
                kind: NotificationKind::Info,
            },
        )
        .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::Notification(p) => {
                assert_eq!(p.tipo, NotificationKind::Info);
                assert!(p.alarma.is_none());
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn alarm_typed_notice_is_never_broadcast() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let mut rx = bound_session(&hub, "1", &seven);

        let result = dispatch(
            &hub,
            AlertEvent::Notice {
                neighborhood: seven.clone(),
                emitter: "Usuario".into(),
                mensaje: "falsa alarma".into(),
                kind: NotificationKind::Alarma,
            },
        );
        assert!(matches!(result, Err(AlertError::Dispatch(_))));
        // Neither notification nor newAlarm reached the room.
        assert!(rx.try_recv().is_err());
    }
}
