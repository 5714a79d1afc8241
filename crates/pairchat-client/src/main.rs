//! # pairchat-demo
//!
//! Two in-process clients sharing an in-memory remote store:
//! - Alice creates a session and Bob joins it from the QR payload
//! - Bob writes, Alice is notified, opens the chat and replies
//! - Bob loses connectivity, queues two messages, and they drain in order
//!   when he comes back online

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::info;

use pairchat_client::commands::{chats, messaging, session};
use pairchat_client::{forward_events, AppState, ClientConfig, Connectivity, DatabaseLocation};
use pairchat_shared::LocalUser;
use pairchat_sync::MemoryRemote;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    pairchat_client::init_tracing();
    info!("Starting pairchat demo v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Two clients on one remote
    // -----------------------------------------------------------------------
    let base = ClientConfig::from_env();
    let remote = MemoryRemote::new();

    let alice = start_client(&base, &remote, LocalUser::new("alice", "Alice")).await?;
    let bob = start_client(&base, &remote, LocalUser::new("bob", "Bob")).await?;

    // -----------------------------------------------------------------------
    // 3. QR pairing
    // -----------------------------------------------------------------------
    let qr = session::create_session(&alice).await?;
    info!(payload = %qr.qr_payload, "Alice shows a QR code");

    let chat = session::join_session(&bob, qr.qr_payload).await?;
    info!(chat = %chat.id, with = %chat.title, "Bob joined");

    let a = &alice;
    wait_until("Alice sees the chat", || async move {
        chats::list_chats(a)
            .await
            .map(|list| list.len() == 1)
            .unwrap_or(false)
    })
    .await?;

    // -----------------------------------------------------------------------
    // 4. Online exchange
    // -----------------------------------------------------------------------
    messaging::send_message(&bob, chat.id.clone(), "Hi Alice!".into()).await?;

    wait_until("Bob's first message reaches Alice", || async move {
        chats::list_chats(a)
            .await
            .map(|list| list.iter().any(|c| c.last_message.is_some()))
            .unwrap_or(false)
    })
    .await?;

    messaging::open_chat(&alice, chat.id.clone()).await?;
    messaging::send_message(&alice, chat.id.clone(), "Hey Bob, got it.".into()).await?;

    // -----------------------------------------------------------------------
    // 5. Outage on Bob's side
    // -----------------------------------------------------------------------
    info!("Bob goes offline");
    remote.set_online(false);
    bob.connectivity().report(false);

    for text in ["Are you still there?", "I'm in a tunnel"] {
        let queued = messaging::send_message(&bob, chat.id.clone(), text.into()).await?;
        info!(message = %queued.id, status = %queued.status, "Bob wrote while offline");
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("Bob is back online");
    remote.set_online(true);
    bob.connectivity().report(true);

    wait_until("queued messages reach Alice", || {
        let chat_id = chat.id.clone();
        async move {
            messaging::get_messages(a, chat_id)
                .await
                .map(|messages| messages.len() == 4)
                .unwrap_or(false)
        }
    })
    .await?;

    // -----------------------------------------------------------------------
    // 6. Transcript and shutdown
    // -----------------------------------------------------------------------
    for m in messaging::get_messages(&alice, chat.id.clone()).await? {
        println!("[{}] {}: {} ({})", m.timestamp, m.sender_name, m.content, m.status);
    }

    alice.shutdown().await?;
    bob.shutdown().await?;
    info!("Demo finished");
    Ok(())
}

async fn start_client(
    base: &ClientConfig,
    remote: &MemoryRemote,
    user: LocalUser,
) -> anyhow::Result<AppState> {
    let name = user.display_name.clone();
    let config = ClientConfig {
        database: DatabaseLocation::InMemory,
        user,
        ..base.clone()
    };

    let (state, events) = AppState::start(config, Arc::new(remote.clone()), Connectivity::manual(true))
        .await
        .with_context(|| format!("starting client for {name}"))?;

    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    forward_events(events, state.user().id.clone(), ui_tx);
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            info!(client = %name, event = event.name, payload = %event.payload, "UI event");
        }
    });

    Ok(state)
}

async fn wait_until<F, Fut>(what: &str, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("timed out waiting until {what}")
}
