//! In-process [`RemoteSyncSource`].
//!
//! Behaves like a real-time document store: every subscriber receives the
//! full current state on subscribe and again after every change that
//! affects it. Clones share the same backing state, so two clients in one
//! process talk to the same "server".

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use pairchat_shared::protocol::{RemoteChat, RemoteLastMessage, RemoteMessage};
use pairchat_shared::session::SessionJoinPayload;
use pairchat_shared::timestamp::{self, parse_timestamp};
use pairchat_shared::{ChatId, LocalUser, UserId};

use crate::connectivity::ConnectivityProbe;
use crate::error::RemoteError;
use crate::remote::{RemoteSyncSource, SnapshotStream};

const SUBSCRIBER_BUFFER: usize = 64;

type Sender<T> = mpsc::Sender<Result<Vec<T>, RemoteError>>;

#[derive(Debug)]
struct Session {
    creator: LocalUser,
    used: bool,
}

#[derive(Default)]
struct State {
    online: bool,
    chats: BTreeMap<String, RemoteChat>,
    /// Per chat, in timestamp order.
    messages: HashMap<String, Vec<RemoteMessage>>,
    sessions: HashMap<String, Session>,
    chat_subscribers: Vec<(UserId, Sender<RemoteChat>)>,
    message_subscribers: Vec<(ChatId, Sender<RemoteMessage>)>,
    send_count: usize,
}

impl State {
    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.online {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("remote store offline".into()))
        }
    }

    fn chats_for(&self, user: &UserId) -> Vec<RemoteChat> {
        self.chats
            .values()
            .filter(|c| c.is_active && c.participants.iter().any(|p| p == user.as_str()))
            .cloned()
            .collect()
    }

    fn messages_for(&self, chat_id: &str) -> Vec<RemoteMessage> {
        self.messages.get(chat_id).cloned().unwrap_or_default()
    }
}

/// Deliveries computed under the lock and sent after releasing it.
#[derive(Default)]
struct Outgoing {
    chats: Vec<(Sender<RemoteChat>, Result<Vec<RemoteChat>, RemoteError>)>,
    messages: Vec<(Sender<RemoteMessage>, Result<Vec<RemoteMessage>, RemoteError>)>,
}

impl Outgoing {
    fn deliver(self) {
        for (tx, snapshot) in self.chats {
            if let Err(e) = tx.try_send(snapshot) {
                tracing::warn!(error = %e, "chat snapshot not delivered");
            }
        }
        for (tx, snapshot) in self.messages {
            if let Err(e) = tx.try_send(snapshot) {
                tracing::warn!(error = %e, "message snapshot not delivered");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    /// A new, online, empty store.
    pub fn new() -> Self {
        let remote = Self::default();
        remote.lock().online = true;
        remote
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate an outage. Subscriptions stay open; calls fail while offline.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
        tracing::debug!(online, "memory remote connectivity set");
    }

    pub fn is_online_now(&self) -> bool {
        self.lock().online
    }

    /// Insert a chat directly, bypassing the session flow.
    pub fn seed_chat(&self, chat: RemoteChat) {
        let mut state = self.lock();
        let id = chat.id.clone();
        state.chats.insert(id.clone(), chat);
        let out = fan_out(&mut state, Some(&id), None);
        drop(state);
        out.deliver();
    }

    /// Send every subscriber its current snapshot again, as a flaky backend
    /// would.
    pub fn redeliver(&self) {
        let mut state = self.lock();
        let out = fan_out(&mut state, None, None);
        drop(state);
        out.deliver();
    }

    /// Push a delivery error to every open subscription.
    pub fn inject_error(&self, error: RemoteError) {
        let mut state = self.lock();
        prune(&mut state);
        let mut out = Outgoing::default();
        for (_, tx) in &state.chat_subscribers {
            out.chats.push((tx.clone(), Err(error.clone())));
        }
        for (_, tx) in &state.message_subscribers {
            out.messages.push((tx.clone(), Err(error.clone())));
        }
        drop(state);
        out.deliver();
    }

    /// End every open subscription stream.
    pub fn disconnect_subscribers(&self) {
        let mut state = self.lock();
        state.chat_subscribers.clear();
        state.message_subscribers.clear();
    }

    pub fn chat(&self, chat_id: &ChatId) -> Option<RemoteChat> {
        self.lock().chats.get(chat_id.as_str()).cloned()
    }

    pub fn messages_of(&self, chat_id: &ChatId) -> Vec<RemoteMessage> {
        self.lock().messages_for(chat_id.as_str())
    }

    /// Accepted message writes, duplicates excluded.
    pub fn send_count(&self) -> usize {
        self.lock().send_count
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        prune(&mut state);
        state.chat_subscribers.len() + state.message_subscribers.len()
    }
}

fn prune(state: &mut State) {
    state.chat_subscribers.retain(|(_, tx)| !tx.is_closed());
    state.message_subscribers.retain(|(_, tx)| !tx.is_closed());
}

/// Snapshots for subscribers affected by a change to `chat` (or everyone).
fn fan_out(state: &mut State, chat: Option<&str>, messages_of: Option<&str>) -> Outgoing {
    prune(state);
    let mut out = Outgoing::default();

    let affected: Option<Vec<String>> = chat.map(|id| {
        state
            .chats
            .get(id)
            .map(|c| c.participants.clone())
            .unwrap_or_default()
    });
    for (user, tx) in &state.chat_subscribers {
        let interested = affected
            .as_ref()
            .map_or(true, |ps| ps.iter().any(|p| p == user.as_str()));
        if interested {
            out.chats.push((tx.clone(), Ok(state.chats_for(user))));
        }
    }

    for (chat_id, tx) in &state.message_subscribers {
        let interested = match (chat, messages_of) {
            (_, Some(m)) => m == chat_id.as_str(),
            (Some(_), None) => false,
            (None, None) => true,
        };
        if interested {
            out.messages
                .push((tx.clone(), Ok(state.messages_for(chat_id.as_str()))));
        }
    }
    out
}

#[async_trait]
impl RemoteSyncSource for MemoryRemote {
    async fn subscribe_to_user_chats(
        &self,
        user_id: &UserId,
    ) -> Result<SnapshotStream<RemoteChat>, RemoteError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut state = self.lock();
        state.ensure_online()?;
        let initial = state.chats_for(user_id);
        state.chat_subscribers.push((user_id.clone(), tx.clone()));
        drop(state);

        let _ = tx.try_send(Ok(initial));
        Ok(rx)
    }

    async fn subscribe_to_messages(
        &self,
        chat_id: &ChatId,
    ) -> Result<SnapshotStream<RemoteMessage>, RemoteError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut state = self.lock();
        state.ensure_online()?;
        let initial = state.messages_for(chat_id.as_str());
        state.message_subscribers.push((chat_id.clone(), tx.clone()));
        drop(state);

        let _ = tx.try_send(Ok(initial));
        Ok(rx)
    }

    async fn send_message(&self, message: &RemoteMessage) -> Result<(), RemoteError> {
        let sent_at = parse_timestamp(&message.timestamp)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;

        let mut state = self.lock();
        state.ensure_online()?;

        let chat = state
            .chats
            .get_mut(&message.chat_id)
            .filter(|c| c.is_active)
            .ok_or_else(|| RemoteError::ChatNotFound(ChatId::from(message.chat_id.as_str())))?;
        if !chat.participants.iter().any(|p| *p == message.sender_id) {
            return Err(RemoteError::NotParticipant {
                chat: ChatId::from(message.chat_id.as_str()),
                user: UserId::from(message.sender_id.as_str()),
            });
        }

        let list = state.messages.entry(message.chat_id.clone()).or_default();
        if list.iter().any(|m| m.id == message.id) {
            return Ok(());
        }
        list.push(message.clone());
        list.sort_by_key(|m| parse_timestamp(&m.timestamp).ok());
        let newest = list.last().cloned();
        state.send_count += 1;

        if let (Some(chat), Some(newest)) = (state.chats.get_mut(&message.chat_id), newest) {
            chat.last_message = Some(RemoteLastMessage {
                content: newest.content.clone(),
                timestamp: newest.timestamp.clone(),
                sender_id: newest.sender_id.clone(),
            });
            let updated = parse_timestamp(&chat.updated_at).ok();
            if updated.map_or(true, |u| sent_at > u) {
                chat.updated_at = message.timestamp.clone();
            }
        }

        let chat_id = message.chat_id.clone();
        let out = fan_out(&mut state, Some(&chat_id), Some(&chat_id));
        drop(state);
        out.deliver();
        Ok(())
    }

    async fn create_session(&self, session_id: &str, creator: &LocalUser) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;
        if state.sessions.contains_key(session_id) {
            return Err(RemoteError::Rejected(format!(
                "session {session_id} already exists"
            )));
        }
        state.sessions.insert(
            session_id.to_string(),
            Session {
                creator: creator.clone(),
                used: false,
            },
        );
        tracing::debug!(session = %session_id, creator = %creator.id, "session created");
        Ok(())
    }

    async fn join_session(
        &self,
        payload: &SessionJoinPayload,
        user: &LocalUser,
    ) -> Result<RemoteChat, RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;

        let session = state
            .sessions
            .get_mut(&payload.session_id)
            .ok_or_else(|| RemoteError::SessionNotFound(payload.session_id.clone()))?;
        if session.creator.id == user.id {
            return Err(RemoteError::SelfJoin);
        }
        if session.used {
            return Err(RemoteError::SessionAlreadyUsed(payload.session_id.clone()));
        }
        session.used = true;
        let creator = session.creator.clone();

        let now: pairchat_shared::RawTimestamp = timestamp::now().into();
        let chat = RemoteChat {
            id: ChatId::new().0,
            participants: vec![creator.id.0.clone(), user.id.0.clone()],
            participant_names: [
                (creator.id.0.clone(), creator.display_name.clone()),
                (user.id.0.clone(), user.display_name.clone()),
            ]
            .into(),
            created_at: now.clone(),
            updated_at: now,
            last_message: None,
            is_active: true,
        };
        state.chats.insert(chat.id.clone(), chat.clone());
        tracing::debug!(session = %payload.session_id, chat = %chat.id, "session joined");

        let out = fan_out(&mut state, Some(&chat.id), None);
        drop(state);
        out.deliver();
        Ok(chat)
    }

    async fn leave_chat(&self, chat_id: &ChatId, user_id: &UserId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;

        let chat = state
            .chats
            .get_mut(chat_id.as_str())
            .ok_or_else(|| RemoteError::ChatNotFound(chat_id.clone()))?;
        if !chat.participants.iter().any(|p| p == user_id.as_str()) {
            return Err(RemoteError::NotParticipant {
                chat: chat_id.clone(),
                user: user_id.clone(),
            });
        }
        chat.is_active = false;

        let out = fan_out(&mut state, Some(chat_id.as_str()), None);
        drop(state);
        out.deliver();
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for MemoryRemote {
    async fn is_online(&self) -> bool {
        self.is_online_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{alice, bob, remote_chat, remote_message};

    #[tokio::test]
    async fn test_subscribers_get_full_snapshots() {
        let remote = MemoryRemote::new();
        remote.seed_chat(remote_chat("c1", None));

        let mut chats = remote
            .subscribe_to_user_chats(&"u2".into())
            .await
            .unwrap();
        let mut messages = remote.subscribe_to_messages(&"c1".into()).await.unwrap();
        assert_eq!(chats.recv().await.unwrap().unwrap().len(), 1);
        assert!(messages.recv().await.unwrap().unwrap().is_empty());

        remote
            .send_message(&remote_message("c1", "m2", "u1", 200))
            .await
            .unwrap();
        remote
            .send_message(&remote_message("c1", "m1", "u1", 100))
            .await
            .unwrap();

        let _ = messages.recv().await.unwrap().unwrap();
        let latest = messages.recv().await.unwrap().unwrap();
        let ids: Vec<_> = latest.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let _ = chats.recv().await.unwrap().unwrap();
        let latest = chats.recv().await.unwrap().unwrap();
        assert_eq!(latest[0].last_message.as_ref().unwrap().content, "message m2");
    }

    #[tokio::test]
    async fn test_send_is_idempotent_by_id() {
        let remote = MemoryRemote::new();
        remote.seed_chat(remote_chat("c1", None));
        let m = remote_message("c1", "m1", "u1", 100);

        remote.send_message(&m).await.unwrap();
        remote.send_message(&m).await.unwrap();

        assert_eq!(remote.messages_of(&"c1".into()).len(), 1);
        assert_eq!(remote.send_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_calls_fail() {
        let remote = MemoryRemote::new();
        remote.seed_chat(remote_chat("c1", None));
        remote.set_online(false);

        let err = remote
            .send_message(&remote_message("c1", "m1", "u1", 100))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(remote.subscribe_to_user_chats(&"u1".into()).await.is_err());
        assert!(!remote.is_online().await);
    }

    #[tokio::test]
    async fn test_session_flow() {
        let remote = MemoryRemote::new();
        let payload = SessionJoinPayload::create(&alice());
        remote
            .create_session(&payload.session_id, &alice())
            .await
            .unwrap();

        assert_eq!(
            remote.join_session(&payload, &alice()).await.unwrap_err(),
            RemoteError::SelfJoin
        );

        let chat = remote.join_session(&payload, &bob()).await.unwrap();
        assert_eq!(chat.participants, vec!["u1", "u2"]);
        assert_eq!(chat.participant_names["u2"], "Bob");

        assert!(matches!(
            remote.join_session(&payload, &bob()).await,
            Err(RemoteError::SessionAlreadyUsed(_))
        ));
        let missing = SessionJoinPayload::parse("no-such-session").unwrap();
        assert!(matches!(
            remote.join_session(&missing, &bob()).await,
            Err(RemoteError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_hides_chat_from_both() {
        let remote = MemoryRemote::new();
        remote.seed_chat(remote_chat("c1", None));
        let mut chats = remote
            .subscribe_to_user_chats(&"u1".into())
            .await
            .unwrap();
        let _ = chats.recv().await;

        remote
            .leave_chat(&"c1".into(), &"u2".into())
            .await
            .unwrap();

        assert!(chats.recv().await.unwrap().unwrap().is_empty());
        assert!(!remote.chat(&"c1".into()).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_injected_errors_and_disconnects() {
        let remote = MemoryRemote::new();
        let mut chats = remote
            .subscribe_to_user_chats(&"u1".into())
            .await
            .unwrap();
        let _ = chats.recv().await;

        remote.inject_error(RemoteError::Unavailable("boom".into()));
        assert!(chats.recv().await.unwrap().is_err());

        remote.disconnect_subscribers();
        assert!(chats.recv().await.is_none());
        assert_eq!(remote.subscriber_count(), 0);
    }
}
