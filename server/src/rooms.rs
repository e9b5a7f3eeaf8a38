//! Room fan-out hub — the single writer for room and membership state.
//!
//! One mutex guards the room map, the per-session bindings, and the
//! membership registry, so identify/disconnect/broadcast are each atomic
//! with respect to one another. The lock is never held across an await;
//! broadcast is a synchronous `try_send` enqueue per member.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::MembershipRegistry;
use crate::types::{NeighborhoodId, RoomKey, ServerMessage, SessionId, UserId};

/// Outbound channel handle for one session's writer task.
pub type SessionTx = mpsc::Sender<ServerMessage>;

#[derive(Debug)]
struct RoomMember {
    user: Option<UserId>,
    tx: SessionTx,
}

/// Where a session currently is. Legacy joins carry no user.
#[derive(Debug, Clone)]
struct Binding {
    neighborhood: NeighborhoodId,
    user: Option<UserId>,
}

#[derive(Default)]
struct HubInner {
    rooms: HashMap<RoomKey, HashMap<SessionId, RoomMember>>,
    bindings: HashMap<SessionId, Binding>,
    registry: MembershipRegistry,
}

#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a session to a (user, neighborhood) pair.
    ///
    /// Idempotent: re-identifying with the same pair re-joins the
    /// transport room (required after a reconnect, where the session id
    /// is fresh anyway) and is a no-op at the registry level.
    /// Re-identifying with a different pair leaves the old room first.
    pub fn identify(
        &self,
        session: SessionId,
        tx: SessionTx,
        user: UserId,
        neighborhood: NeighborhoodId,
    ) -> Vec<UserId> {
        let mut inner = self.lock();
        Self::leave_current(&mut inner, session);

        let key = RoomKey::for_neighborhood(&neighborhood);
        inner.rooms.entry(key).or_default().insert(
            session,
            RoomMember {
                user: Some(user.clone()),
                tx,
            },
        );
        inner.bindings.insert(
            session,
            Binding {
                neighborhood: neighborhood.clone(),
                user: Some(user.clone()),
            },
        );
        let members = inner.registry.bind(user.clone(), neighborhood.clone());
        debug!(session_id = %session, user_id = %user, vecindario_id = %neighborhood,
               members = members.len(), "session identified");
        members
    }

    /// Join a neighborhood room without registry accounting.
    pub fn join_legacy(&self, session: SessionId, tx: SessionTx, neighborhood: NeighborhoodId) {
        let mut inner = self.lock();
        Self::leave_current(&mut inner, session);

        let key = RoomKey::for_neighborhood(&neighborhood);
        inner
            .rooms
            .entry(key)
            .or_default()
            .insert(session, RoomMember { user: None, tx });
        inner.bindings.insert(
            session,
            Binding {
                neighborhood: neighborhood.clone(),
                user: None,
            },
        );
        debug!(session_id = %session, vecindario_id = %neighborhood, "legacy room join");
    }

    /// Drop a session. If it was identified, the user leaves the
    /// registry only when no other live session in the same room still
    /// carries that user id (a user on two devices stays a member until
    /// the last device disconnects).
    pub fn disconnect(&self, session: SessionId) {
        let mut inner = self.lock();
        Self::leave_current(&mut inner, session);
        inner.bindings.remove(&session);
    }

    /// Deliver a message to every session in a neighborhood's room.
    /// Fire-and-forget: a full or closed per-session channel drops the
    /// frame for that session only. An empty or unknown room is a no-op.
    /// Returns the number of sessions the message was enqueued for.
    pub fn broadcast_to_room(&self, neighborhood: &NeighborhoodId, msg: ServerMessage) -> usize {
        let inner = self.lock();
        let key = RoomKey::for_neighborhood(neighborhood);
        let Some(room) = inner.rooms.get(&key) else {
            debug!(room = %key, "broadcast to empty room");
            return 0;
        };

        let mut delivered = 0;
        for (session, member) in room {
            match member.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session_id = %session, room = %key, "dropping frame: {e}");
                }
            }
        }
        delivered
    }

    /// Current member set of a neighborhood (registry snapshot).
    pub fn members_of(&self, neighborhood: &NeighborhoodId) -> Vec<UserId> {
        self.lock().registry.members_of(neighborhood)
    }

    /// Number of sessions currently joined to a neighborhood's room,
    /// legacy joins included.
    pub fn sessions_in(&self, neighborhood: &NeighborhoodId) -> usize {
        let key = RoomKey::for_neighborhood(neighborhood);
        self.lock().rooms.get(&key).map(|r| r.len()).unwrap_or(0)
    }

    fn leave_current(inner: &mut HubInner, session: SessionId) {
        let Some(binding) = inner.bindings.remove(&session) else {
            return;
        };
        let key = RoomKey::for_neighborhood(&binding.neighborhood);

        let mut user_still_present = false;
        if let Some(room) = inner.rooms.get_mut(&key) {
            room.remove(&session);
            if let Some(user) = &binding.user {
                user_still_present = room.values().any(|m| m.user.as_ref() == Some(user));
            }
            if room.is_empty() {
                inner.rooms.remove(&key);
            }
        }

        if let Some(user) = binding.user {
            if !user_still_present {
                inner.registry.unbind(&user, &binding.neighborhood);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationKind, NotificationPayload};
    use chrono::Utc;

    fn payload(msg: &str, n: &NeighborhoodId) -> ServerMessage {
        ServerMessage::Notification(NotificationPayload {
            mensaje: msg.into(),
            tipo: NotificationKind::Info,
            emisor: "Usuario".into(),
            timestamp: Utc::now(),
            vecindario_id: n.clone(),
            alarma: None,
        })
    }

    fn session() -> (SessionId, SessionTx, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionId::new(), tx, rx)
    }

    #[test]
    fn broadcast_reaches_only_bound_room() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let nine = NeighborhoodId::from("9");

        let (s1, t1, mut r1) = session();
        let (s2, t2, mut r2) = session();
        let (s3, t3, mut r3) = session();
        hub.identify(s1, t1, UserId::from("1"), seven.clone());
        hub.identify(s2, t2, UserId::from("2"), seven.clone());
        hub.identify(s3, t3, UserId::from("3"), nine.clone());

        let delivered = hub.broadcast_to_room(&seven, payload("test", &seven));
        assert_eq!(delivered, 2);
        assert!(r1.try_recv().is_ok());
        assert!(r1.try_recv().is_err()); // exactly once
        assert!(r2.try_recv().is_ok());
        assert!(r3.try_recv().is_err());
    }

    #[test]
    fn empty_room_broadcast_is_noop() {
        let hub = Hub::new();
        let nowhere = NeighborhoodId::from("999");
        assert_eq!(hub.broadcast_to_room(&nowhere, payload("x", &nowhere)), 0);
    }

    #[test]
    fn disconnect_unbinds_and_stops_delivery() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let (s1, t1, mut r1) = session();
        hub.identify(s1, t1, UserId::from("42"), seven.clone());
        assert_eq!(hub.members_of(&seven), vec![UserId::from("42")]);

        hub.disconnect(s1);
        assert!(hub.members_of(&seven).is_empty());
        assert_eq!(hub.sessions_in(&seven), 0);
        assert_eq!(hub.broadcast_to_room(&seven, payload("x", &seven)), 0);
        assert!(r1.try_recv().is_err());
    }

    #[test]
    fn reconnect_and_reidentify_yields_single_membership() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");

        let (s1, t1, _r1) = session();
        hub.identify(s1, t1, UserId::from("42"), seven.clone());

        // Transport drop, then a fresh session re-identifies.
        hub.disconnect(s1);
        let (s2, t2, _r2) = session();
        hub.identify(s2, t2, UserId::from("42"), seven.clone());

        assert_eq!(hub.members_of(&seven), vec![UserId::from("42")]);
        assert_eq!(hub.sessions_in(&seven), 1);
    }

    #[test]
    fn reidentify_same_pair_is_idempotent() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let (s1, t1, mut r1) = session();
        hub.identify(s1, t1.clone(), UserId::from("42"), seven.clone());
        hub.identify(s1, t1, UserId::from("42"), seven.clone());

        assert_eq!(hub.members_of(&seven), vec![UserId::from("42")]);
        assert_eq!(hub.sessions_in(&seven), 1);
        hub.broadcast_to_room(&seven, payload("uno", &seven));
        assert!(r1.try_recv().is_ok());
        assert!(r1.try_recv().is_err());
    }

    #[test]
    fn reidentify_moves_between_rooms() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let nine = NeighborhoodId::from("9");
        let (s1, t1, _r1) = session();
        hub.identify(s1, t1.clone(), UserId::from("42"), seven.clone());
        hub.identify(s1, t1, UserId::from("42"), nine.clone());

        assert!(hub.members_of(&seven).is_empty());
        assert_eq!(hub.members_of(&nine), vec![UserId::from("42")]);
        assert_eq!(hub.sessions_in(&seven), 0);
    }

    #[test]
    fn multi_device_user_stays_until_last_disconnect() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let (s1, t1, _r1) = session();
        let (s2, t2, _r2) = session();
        hub.identify(s1, t1, UserId::from("42"), seven.clone());
        hub.identify(s2, t2, UserId::from("42"), seven.clone());

        hub.disconnect(s1);
        assert_eq!(hub.members_of(&seven), vec![UserId::from("42")]);

        hub.disconnect(s2);
        assert!(hub.members_of(&seven).is_empty());
    }

    #[test]
    fn legacy_join_receives_broadcasts_without_membership() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let (s1, t1, mut r1) = session();
        hub.join_legacy(s1, t1, seven.clone());

        assert!(hub.members_of(&seven).is_empty());
        assert_eq!(hub.broadcast_to_room(&seven, payload("x", &seven)), 1);
        assert!(r1.try_recv().is_ok());
    }

    #[test]
    fn full_channel_drops_frame_for_that_session_only() {
        let hub = Hub::new();
        let seven = NeighborhoodId::from("7");
        let (s1, t1, _r1) = {
            let (tx, rx) = mpsc::channel(1);
            (SessionId::new(), tx, rx)
        };
        let (s2, t2, mut r2) = session();
        hub.identify(s1, t1, UserId::from("1"), seven.clone());
        hub.identify(s2, t2, UserId::from("2"), seven.clone());

        // First frame fills s1's single-slot buffer.
        assert_eq!(hub.broadcast_to_room(&seven, payload("a", &seven)), 2);
        // Second frame only fits s2.
        assert_eq!(hub.broadcast_to_room(&seven, payload("b", &seven)), 1);
        assert!(r2.try_recv().is_ok());
        assert!(r2.try_recv().is_ok());
    }
}
