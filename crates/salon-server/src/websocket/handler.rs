//! Per-connection chat state machine, independent of the transport.

use std::sync::Arc;

use metrics::counter;
use salon_core::{Envelope, GroupKey, Room, RoomIdentifier};
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::errors::ConnectError;
use crate::groups::GroupRegistry;
use crate::metrics::CHAT_MESSAGES_TOTAL;
use crate::params::ConnectParams;

use super::connection::ClientConnection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joined,
    Closed,
}

/// One client's lifecycle: `Connecting → Authenticating → Joined → Closed`.
///
/// Dropping a session disconnects it, so a cancelled task still leaves its
/// group and announces the departure.
pub struct ChatSession {
    connection: Arc<ClientConnection>,
    username: String,
    groups: Arc<GroupRegistry>,
    group: Option<GroupKey>,
    state: SessionState,
}

impl ChatSession {
    pub fn new(
        connection: Arc<ClientConnection>,
        username: impl Into<String>,
        groups: Arc<GroupRegistry>,
    ) -> Self {
        Self {
            connection,
            username: username.into(),
            groups,
            group: None,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    pub fn group(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    /// Resolve the requested room. A refusal closes the session for good.
    pub async fn authenticate(
        &mut self,
        auth: &Authenticator,
        identifier: &RoomIdentifier,
        params: ConnectParams,
    ) -> Result<Room, ConnectError> {
        if self.state != SessionState::Connecting {
            return Err(ConnectError::InvalidState);
        }
        self.state = SessionState::Authenticating;
        let result = auth.authenticate(identifier, params).await;
        if result.is_err() {
            self.state = SessionState::Closed;
        }
        result
    }

    /// Register with the room's group and announce the arrival to every
    /// member, this session included.
    pub fn join(&mut self, room: &Room) -> bool {
        if !matches!(
            self.state,
            SessionState::Connecting | SessionState::Authenticating
        ) {
            return false;
        }
        let key = GroupKey::for_room(&room.name);
        let _ = self.groups.join(&key, Arc::clone(&self.connection));
        self.state = SessionState::Joined;
        info!(conn_id = %self.connection.id, group = %key, username = %self.username, "joined room");
        let _ = self.groups.publish(&key, &Envelope::joined(&self.username));
        self.group = Some(key);
        true
    }

    /// Relay one inbound text frame to the group.
    ///
    /// Ignored unless joined, and for empty frames. Returns how many members
    /// the message was enqueued for.
    pub fn receive(&self, raw: &str) -> Option<usize> {
        if self.state != SessionState::Joined || raw.is_empty() {
            return None;
        }
        let key = self.group.as_ref()?;
        let envelope = Envelope::decode(raw, &self.username);
        counter!(CHAT_MESSAGES_TOTAL).increment(1);
        let delivered = self.groups.publish(key, &envelope);
        debug!(conn_id = %self.connection.id, group = %key, delivered, "relayed message");
        Some(delivered)
    }

    /// Leave the group and announce the departure. Safe to call repeatedly;
    /// only the first call has any effect.
    pub fn disconnect(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let was_joined = self.state == SessionState::Joined;
        self.state = SessionState::Closed;
        if let Some(key) = self.group.take() {
            let _ = self.groups.leave(&key, &self.connection.id);
            if was_joined {
                let _ = self.groups.publish(&key, &Envelope::left(&self.username));
            }
            info!(conn_id = %self.connection.id, group = %key, username = %self.username, "left room");
        }
        true
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use salon_core::ConnectionId;
    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::tests::authenticator;

    fn room(name: &str) -> Room {
        Room {
            id: 1,
            name: name.to_string(),
            password_hash: String::new(),
            created_at: String::new(),
        }
    }

    fn session(
        groups: &Arc<GroupRegistry>,
        username: &str,
    ) -> (ChatSession, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        (ChatSession::new(conn, username, Arc::clone(groups)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn params(pairs: &[(&str, &str)]) -> ConnectParams {
        ConnectParams::from_pairs(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())))
    }

    #[test]
    fn starts_connecting() {
        let groups = Arc::new(GroupRegistry::default());
        let (s, _rx) = session(&groups, "alice");
        assert_eq!(s.state(), SessionState::Connecting);
        assert!(s.group().is_none());
    }

    #[test]
    fn join_announces_to_self() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, mut rx) = session(&groups, "alice");
        assert!(alice.join(&room("lobby")));
        assert_eq!(alice.state(), SessionState::Joined);
        assert_eq!(alice.group().unwrap().as_str(), "chat_lobby");
        assert_eq!(drain(&mut rx), vec![Envelope::joined("alice")]);
    }

    #[test]
    fn join_twice_refused() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, _rx) = session(&groups, "alice");
        assert!(alice.join(&room("lobby")));
        assert!(!alice.join(&room("kitchen")));
        assert_eq!(groups.group_count(), 1);
    }

    #[test]
    fn join_notice_reaches_existing_members() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, mut arx) = session(&groups, "alice");
        let (mut bob, _brx) = session(&groups, "bob");
        let _ = alice.join(&room("lobby"));
        let _ = drain(&mut arx);
        let _ = bob.join(&room("lobby"));
        assert_eq!(drain(&mut arx), vec![Envelope::joined("bob")]);
    }

    #[test]
    fn receive_relays_to_all_members() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, mut arx) = session(&groups, "alice");
        let (mut bob, mut brx) = session(&groups, "bob");
        let _ = alice.join(&room("lobby"));
        let _ = bob.join(&room("lobby"));
        let _ = drain(&mut arx);
        let _ = drain(&mut brx);

        assert_eq!(alice.receive(r#"{"message":"hi","username":"alice"}"#), Some(2));
        let expected = Envelope::new("hi", "alice");
        assert_eq!(drain(&mut brx), vec![expected.clone()]);
        assert_eq!(drain(&mut arx), vec![expected]);
    }

    #[test]
    fn receive_raw_text_uses_session_username() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut bob, mut rx) = session(&groups, "bob");
        let _ = bob.join(&room("lobby"));
        let _ = drain(&mut rx);
        let _ = bob.receive("hello");
        assert_eq!(drain(&mut rx), vec![Envelope::new("hello", "bob")]);
    }

    #[test]
    fn receive_ignored_before_join_and_when_empty() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, mut rx) = session(&groups, "alice");
        assert_eq!(alice.receive("early"), None);
        let _ = alice.join(&room("lobby"));
        let _ = drain(&mut rx);
        assert_eq!(alice.receive(""), None);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn disconnect_announces_once() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, _arx) = session(&groups, "alice");
        let (mut bob, mut brx) = session(&groups, "bob");
        let _ = alice.join(&room("lobby"));
        let _ = bob.join(&room("lobby"));
        let _ = drain(&mut brx);

        assert!(alice.disconnect());
        assert!(!alice.disconnect());
        drop(alice);
        assert_eq!(drain(&mut brx), vec![Envelope::left("alice")]);
        assert_eq!(groups.member_count(&GroupKey::for_room("lobby")), 1);
    }

    #[test]
    fn disconnected_member_receives_nothing() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, mut arx) = session(&groups, "alice");
        let (mut bob, _brx) = session(&groups, "bob");
        let _ = alice.join(&room("lobby"));
        let _ = bob.join(&room("lobby"));
        let _ = alice.disconnect();
        let _ = drain(&mut arx);

        let _ = bob.receive("anyone?");
        assert!(drain(&mut arx).is_empty());
        assert_eq!(alice.receive("still here"), None);
    }

    #[test]
    fn drop_disconnects() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, _arx) = session(&groups, "alice");
        let (mut bob, mut brx) = session(&groups, "bob");
        let _ = alice.join(&room("lobby"));
        let _ = bob.join(&room("lobby"));
        let _ = drain(&mut brx);
        drop(alice);
        assert_eq!(drain(&mut brx), vec![Envelope::left("alice")]);
    }

    #[test]
    fn disconnect_before_join_is_silent() {
        let groups = Arc::new(GroupRegistry::default());
        let (mut alice, _rx) = session(&groups, "alice");
        assert!(alice.disconnect());
        assert_eq!(alice.state(), SessionState::Closed);
        assert_eq!(groups.group_count(), 0);
    }

    #[tokio::test]
    async fn failed_authentication_closes() {
        let groups = Arc::new(GroupRegistry::default());
        let (auth, _) = authenticator();
        let (mut alice, _rx) = session(&groups, "alice");
        let err = alice
            .authenticate(&auth, &RoomIdentifier::parse("ghost"), params(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.close_code(), 4000);
        assert_eq!(alice.state(), SessionState::Closed);
        assert!(!alice.join(&room("ghost")));
        assert_eq!(groups.group_count(), 0);
    }

    #[tokio::test]
    async fn authenticate_then_join() {
        let groups = Arc::new(GroupRegistry::default());
        let (auth, _) = authenticator();
        let (mut alice, mut rx) = session(&groups, "alice");
        let room = alice
            .authenticate(
                &auth,
                &RoomIdentifier::parse("lobby"),
                params(&[("password", "secret"), ("create", "1")]),
            )
            .await
            .unwrap();
        assert_eq!(alice.state(), SessionState::Authenticating);
        assert!(alice.join(&room));
        assert_eq!(drain(&mut rx), vec![Envelope::joined("alice")]);
    }

    #[tokio::test]
    async fn second_authentication_is_invalid_state() {
        let groups = Arc::new(GroupRegistry::default());
        let (auth, directory) = authenticator();
        let (mut alice, _rx) = session(&groups, "alice");
        let lobby = RoomIdentifier::parse("lobby");
        let _ = alice
            .authenticate(&auth, &lobby, params(&[("password", "secret"), ("create", "1")]))
            .await
            .unwrap();

        let err = alice
            .authenticate(&auth, &lobby, params(&[("password", "secret")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidState));
        assert_ne!(err.close_code(), 4001);
        assert_eq!(alice.state(), SessionState::Authenticating);
        assert_eq!(directory.room_count(), 1);
    }
}
