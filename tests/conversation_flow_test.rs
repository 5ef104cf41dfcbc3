// tests/conversation_flow_test.rs
//
// End-to-end flows through ChatClient against a scripted transport:
// history paging, live delivery, optimistic send with confirm and retry,
// typing indicators and read receipts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{broadcast, mpsc};

use crewchat::client::ChatClient;
use crewchat::config::ChatConfig;
use crewchat::pager::{ScrollMetrics, anchored_offset};
use crewchat::transport::{ChatTransport, LiveEvent, MessageEnvelope, OutgoingMessage, Page};
use crewchat::types::conversation::ConversationId;
use crewchat::types::message::{Message, MessageId, SendState};

/// Transport whose responses are scripted up front. Pages are served in
/// order; the live channel sender is captured on subscribe so tests can
/// push events; sends either confirm with a fresh server id or fail once.
struct ScriptedTransport {
    pages: Mutex<VecDeque<Page>>,
    live_tx: Mutex<Option<mpsc::Sender<LiveEvent>>>,
    fail_next_send: AtomicBool,
    next_seq: AtomicU64,
    sent: Mutex<Vec<OutgoingMessage>>,
    typing_signals: Mutex<Vec<bool>>,
    marked_read: Mutex<Vec<MessageId>>,
}

impl ScriptedTransport {
    fn new(pages: Vec<Page>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            live_tx: Mutex::new(None),
            fail_next_send: AtomicBool::new(false),
            next_seq: AtomicU64::new(100),
            sent: Mutex::new(Vec::new()),
            typing_signals: Mutex::new(Vec::new()),
            marked_read: Mutex::new(Vec::new()),
        })
    }

    fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    async fn push_live(&self, event: LiveEvent) {
        let tx = self
            .live_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no live subscription open");
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn fetch_page(
        &self,
        _conversation_id: &ConversationId,
        _before_cursor: Option<String>,
        _page_size: usize,
    ) -> Result<Page, anyhow::Error> {
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn subscribe(
        &self,
        _conversation_id: &ConversationId,
    ) -> Result<mpsc::Receiver<LiveEvent>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(16);
        *self.live_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: &OutgoingMessage,
    ) -> Result<Message, anyhow::Error> {
        self.sent.lock().unwrap().push(outgoing.clone());
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("simulated network failure"));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        Ok(Message {
            id: format!("srv-{seq}"),
            conversation_id: conversation_id.clone(),
            sender_id: "tech-1".to_string(),
            sender_name: "Maya".to_string(),
            body: outgoing.body.clone(),
            rich_body: outgoing.rich_body.clone(),
            created_at: Utc::now(),
            server_seq: Some(seq),
            edited: false,
            version: 1,
            reply_to: outgoing.reply_to.clone(),
            attachments: outgoing.attachments.clone(),
            send_state: SendState::Confirmed,
        })
    }

    async fn send_typing_signal(
        &self,
        _conversation_id: &ConversationId,
        is_typing: bool,
    ) -> Result<(), anyhow::Error> {
        self.typing_signals.lock().unwrap().push(is_typing);
        Ok(())
    }

    async fn mark_read(
        &self,
        _conversation_id: &ConversationId,
        up_to: &MessageId,
    ) -> Result<(), anyhow::Error> {
        self.marked_read.lock().unwrap().push(up_to.clone());
        Ok(())
    }
}

fn envelope(id: &str, ts_secs: i64, seq: u64) -> MessageEnvelope {
    MessageEnvelope {
        id: Some(id.to_string()),
        conversation_id: "conv-1".to_string(),
        sender_id: "user-2".to_string(),
        sender_name: "Alex".to_string(),
        body: format!("message {id}"),
        created_at: Some(Utc.timestamp_opt(ts_secs, 0).unwrap()),
        server_seq: Some(seq),
        ..Default::default()
    }
}

fn client_for(transport: Arc<ScriptedTransport>) -> ChatClient {
    let _ = env_logger::builder().is_test(true).try_init();
    ChatClient::new(
        transport,
        "tech-1".to_string(),
        "Maya".to_string(),
        false,
        ChatConfig::default(),
    )
}

async fn recv<T>(rx: &mut broadcast::Receiver<Arc<T>>) -> Arc<T>
where
    T: Clone + Send,
{
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test]
async fn test_history_and_live_events_merge_in_order() {
    let transport = ScriptedTransport::new(vec![Page {
        messages: vec![envelope("m1", 1000, 1), envelope("m2", 2000, 2)],
        has_more: false,
    }]);
    let client = client_for(transport.clone());
    let mut list_rx = client.event_bus().message_list_changed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    recv(&mut list_rx).await; // initial PageLoaded

    transport
        .push_live(LiveEvent::Message(envelope("m3", 3000, 3)))
        .await;
    recv(&mut list_rx).await;
    // A duplicate of m2 arriving over the live channel is a no-op.
    transport
        .push_live(LiveEvent::Message(envelope("m2", 2000, 2)))
        .await;

    let messages = client.messages().await;
    assert_eq!(ids(&messages), vec!["m1", "m2", "m3"]);

    // The open marked the newest confirmed message read.
    assert_eq!(
        transport.marked_read.lock().unwrap().last().unwrap(),
        "m2"
    );
}

#[tokio::test]
async fn test_optimistic_send_confirms_in_place() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client_for(transport.clone());
    let mut confirmed_rx = client.event_bus().message_confirmed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    let temp_id = client
        .send("wrapping up the install".to_string(), None, Vec::new(), None)
        .await
        .unwrap();

    let event = recv(&mut confirmed_rx).await;
    assert_eq!(event.temp_id, temp_id);
    assert_eq!(event.message.id, "srv-100");

    let messages = client.messages().await;
    assert_eq!(ids(&messages), vec!["srv-100"]);
    assert_eq!(messages[0].send_state, SendState::Confirmed);
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
    assert_eq!(
        transport.sent.lock().unwrap()[0].body,
        "wrapping up the install"
    );
}

#[tokio::test]
async fn test_failed_send_then_retry_succeeds() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client_for(transport.clone());
    let mut failed_rx = client.event_bus().send_failed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    transport.fail_next_send();
    let temp_id = client
        .send("no coverage in the basement".to_string(), None, Vec::new(), None)
        .await
        .unwrap();

    let failure = recv(&mut failed_rx).await;
    assert_eq!(failure.temp_id, temp_id);
    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].send_state, SendState::Failed);

    // Retry transmits the same content and reconciles the same entry.
    client.retry(&temp_id).await.unwrap();
    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].send_state, SendState::Confirmed);
    assert_eq!(messages[0].body, "no coverage in the basement");

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].body, sent[1].body);
}

#[tokio::test]
async fn test_scroll_near_top_loads_older_page() {
    let newest = Page {
        messages: vec![envelope("m10", 10_000, 10), envelope("m11", 11_000, 11)],
        has_more: true,
    };
    let older = Page {
        messages: vec![envelope("m8", 8000, 8), envelope("m9", 9000, 9)],
        has_more: false,
    };
    let transport = ScriptedTransport::new(vec![newest, older]);
    let client = client_for(transport.clone());
    client.open_conversation("conv-1".to_string()).await.unwrap();

    let near_top = ScrollMetrics {
        scroll_top: 80.0,
        scroll_height: 4000.0,
        client_height: 800.0,
    };
    let inserted = client.handle_scroll(near_top).await.unwrap();
    assert_eq!(inserted, Some(2));
    assert_eq!(ids(&client.messages().await), vec!["m8", "m9", "m10", "m11"]);

    // The view measures the prepended height and restores the anchor.
    assert_eq!(anchored_offset(80.0, 1400.0), 1480.0);

    // History exhausted: another scroll to the top loads nothing.
    assert_eq!(client.handle_scroll(near_top).await.unwrap(), None);
}

#[tokio::test]
async fn test_typing_signals_round_trip() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client_for(transport.clone());
    let mut typing_rx = client.event_bus().typing_changed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();

    // Local input broadcasts a started signal, debounced upstream.
    client.input_changed().await.unwrap();
    assert_eq!(*transport.typing_signals.lock().unwrap(), vec![true]);

    // Remote typist appears in the caption.
    transport
        .push_live(LiveEvent::Typing {
            user_id: "user-2".to_string(),
            name: "Alex".to_string(),
            is_typing: true,
        })
        .await;
    let event = recv(&mut typing_rx).await;
    assert_eq!(event.typers.len(), 1);
    assert_eq!(client.typing_caption().await.as_deref(), Some("Alex is typing"));

    // Explicit stop clears it.
    transport
        .push_live(LiveEvent::Typing {
            user_id: "user-2".to_string(),
            name: "Alex".to_string(),
            is_typing: false,
        })
        .await;
    recv(&mut typing_rx).await;
    assert_eq!(client.typing_caption().await, None);
}

#[tokio::test]
async fn test_own_typing_echo_is_ignored() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client_for(transport.clone());
    let mut list_rx = client.event_bus().message_list_changed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    recv(&mut list_rx).await; // PageLoaded

    transport
        .push_live(LiveEvent::Typing {
            user_id: "tech-1".to_string(),
            name: "Maya".to_string(),
            is_typing: true,
        })
        .await;
    // Drive another event through to be sure the echo was processed.
    transport
        .push_live(LiveEvent::Message(envelope("m1", 1000, 1)))
        .await;
    recv(&mut list_rx).await;
    assert_eq!(client.typing_caption().await, None);
}

#[tokio::test]
async fn test_live_read_receipts_accumulate() {
    let transport = ScriptedTransport::new(vec![Page {
        messages: vec![envelope("m1", 1000, 1)],
        has_more: false,
    }]);
    let client = client_for(transport.clone());
    let mut receipts_rx = client.event_bus().receipts_changed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    transport
        .push_live(LiveEvent::ReadReceipt {
            message_id: "m1".to_string(),
            reader_id: "user-3".to_string(),
            read_at: Utc::now(),
        })
        .await;

    let event = recv(&mut receipts_rx).await;
    assert_eq!(event.message_id, "m1");
    assert_eq!(client.readers_of("m1").await, vec!["user-3"]);
    // The sender's own receipt is never surfaced; a further reader is.
    transport
        .push_live(LiveEvent::ReadReceipt {
            message_id: "m1".to_string(),
            reader_id: "user-2".to_string(),
            read_at: Utc::now(),
        })
        .await;
    transport
        .push_live(LiveEvent::ReadReceipt {
            message_id: "m1".to_string(),
            reader_id: "user-4".to_string(),
            read_at: Utc::now(),
        })
        .await;
    recv(&mut receipts_rx).await;
    assert_eq!(client.readers_of("m1").await, vec!["user-3", "user-4"]);
}

#[tokio::test]
async fn test_remote_edit_and_delete_flow_through() {
    let transport = ScriptedTransport::new(vec![Page {
        messages: vec![envelope("m1", 1000, 1), envelope("m2", 2000, 2)],
        has_more: false,
    }]);
    let client = client_for(transport.clone());
    let mut list_rx = client.event_bus().message_list_changed.subscribe();

    client.open_conversation("conv-1".to_string()).await.unwrap();
    recv(&mut list_rx).await; // PageLoaded

    transport
        .push_live(LiveEvent::Edited {
            id: "m1".to_string(),
            body: "corrected address".to_string(),
            rich_body: None,
            version: 2,
        })
        .await;
    recv(&mut list_rx).await;

    transport
        .push_live(LiveEvent::Deleted {
            id: "m2".to_string(),
        })
        .await;
    recv(&mut list_rx).await;

    let messages = client.messages().await;
    assert_eq!(ids(&messages), vec!["m1"]);
    assert_eq!(messages[0].body, "corrected address");
    assert!(messages[0].edited);
}
