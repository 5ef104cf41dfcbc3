//! Conversation orchestration.
//!
//! `ChatClient` is the single funnel for all messaging state: it owns the
//! per-conversation engine, send queue, typing tracker, receipt log and
//! pager behind one lock, drains the live subscription in a background
//! task, and publishes change notifications on the event bus. Page loads
//! are tagged with an epoch so a response arriving after the user switched
//! conversations is discarded, never applied.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::pager::{ScrollMetrics, ScrollPager};
use crate::receipts::ReadReceiptLog;
use crate::registry::ConversationRegistry;
use crate::send::{
    SendQueue, build_outgoing, can_delete, can_edit, make_local_message, outgoing_from_message,
    reply_preview_for,
};
use crate::sync::SyncEngine;
use crate::transport::{ChatTransport, LiveEvent};
use crate::types::conversation::{Conversation, ConversationId};
use crate::types::events::{
    EventBus, ListChange, MessageConfirmed, MessageListChanged, ReceiptsChanged, SendFailed,
    TypingChanged, UnreadChanged,
};
use crate::types::message::{Attachment, Message, MessageId, SendState, UserId};
use crate::types::presence::TypingSignal;
use crate::typing::{TypingTracker, typing_caption};

/// All mutable state for one open conversation, behind a single lock so
/// live deliveries, sends and page merges never interleave mid-update.
struct ConversationState {
    engine: SyncEngine,
    queue: SendQueue,
    typing: TypingTracker,
    receipts: ReadReceiptLog,
    pager: ScrollPager,
}

impl ConversationState {
    fn new(conversation_id: ConversationId, config: &ChatConfig) -> Self {
        Self {
            engine: SyncEngine::new(conversation_id, config.max_retained_messages),
            queue: SendQueue::new(),
            typing: TypingTracker::new(
                config.typing_broadcast_interval,
                config.typing_idle_stop,
                config.typing_expiry,
            ),
            receipts: ReadReceiptLog::new(),
            pager: ScrollPager::new(config.near_top_threshold, config.near_bottom_threshold),
        }
    }
}

struct ActiveConversation {
    id: ConversationId,
    state: Arc<Mutex<ConversationState>>,
    drain_task: JoinHandle<()>,
    /// Single pending "stop typing" timer, replaced on every input refresh.
    stop_typing_task: Option<JoinHandle<()>>,
}

impl ActiveConversation {
    fn shut_down(&self) {
        self.drain_task.abort();
        if let Some(task) = &self.stop_typing_task {
            task.abort();
        }
    }
}

pub struct ChatClient {
    config: ChatConfig,
    transport: Arc<dyn ChatTransport>,
    registry: Arc<ConversationRegistry>,
    bus: Arc<EventBus>,
    viewer_id: UserId,
    viewer_name: String,
    /// Elevated roles may edit past the window and delete others' messages.
    viewer_elevated: bool,
    active: Mutex<Option<ActiveConversation>>,
    /// Bumped on every open/close; in-flight responses from an older epoch
    /// are stale and get dropped.
    epoch: AtomicU64,
}

impl ChatClient {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        viewer_id: UserId,
        viewer_name: String,
        viewer_elevated: bool,
        config: ChatConfig,
    ) -> Self {
        let registry = Arc::new(ConversationRegistry::new(viewer_id.clone()));
        Self {
            config,
            transport,
            registry,
            bus: Arc::new(EventBus::new()),
            viewer_id,
            viewer_name,
            viewer_elevated,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Replace conversation summaries from the backend and re-publish the
    /// unread aggregates.
    pub fn sync_conversations(&self, conversations: Vec<Conversation>) {
        for conversation in conversations {
            self.registry.upsert(conversation);
        }
        self.emit_unread();
    }

    /// Open a conversation: subscribe, start the live drain task, load the
    /// first page and mark it read. Any previous conversation is closed and
    /// its in-flight requests invalidated.
    pub async fn open_conversation(&self, id: ConversationId) -> Result<(), ChatError> {
        let epoch = self.bump_epoch();
        let rx = self.transport.subscribe(&id).await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(ChatError::StaleRequest);
        }

        let state = Arc::new(Mutex::new(ConversationState::new(id.clone(), &self.config)));
        let drain_task = tokio::spawn(drain_live_events(
            rx,
            state.clone(),
            self.registry.clone(),
            self.bus.clone(),
            id.clone(),
            self.viewer_id.clone(),
        ));

        {
            let mut active = self.active.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                drain_task.abort();
                return Err(ChatError::StaleRequest);
            }
            if let Some(previous) = active.replace(ActiveConversation {
                id: id.clone(),
                state: state.clone(),
                drain_task,
                stop_typing_task: None,
            }) {
                previous.shut_down();
            }
        }
        self.registry.mark_viewed(&id);
        self.emit_unread();
        debug!(target: "Client", "opened conversation {id}");

        // Initial page, then the read watermark.
        {
            let mut st = state.lock().await;
            st.pager.begin_load();
        }
        self.run_page_fetch(&id, &state, None, epoch).await?;
        self.mark_read().await
    }

    /// Close the active conversation, invalidating in-flight requests.
    pub async fn close_conversation(&self) {
        self.bump_epoch();
        if let Some(active) = self.active.lock().await.take() {
            active.shut_down();
            debug!(target: "Client", "closed conversation {}", active.id);
        }
    }

    /// Feed viewport metrics. When the pager decides an older page is due,
    /// it is fetched and merged before returning; the caller then measures
    /// the added height and restores the anchor via [`crate::pager::anchored_offset`].
    /// Returns how many messages were inserted, or `None` when no load ran.
    pub async fn handle_scroll(&self, metrics: ScrollMetrics) -> Result<Option<usize>, ChatError> {
        let (id, state, epoch, cursor) = {
            let active = self.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Ok(None);
            };
            let mut st = active.state.lock().await;
            if !st.pager.on_scroll(metrics) {
                return Ok(None);
            }
            (
                active.id.clone(),
                active.state.clone(),
                self.epoch.load(Ordering::SeqCst),
                st.engine.next_cursor(),
            )
        };
        self.run_page_fetch(&id, &state, cursor, epoch).await.map(Some)
    }

    /// Explicitly request an older page (e.g. a "load earlier" affordance).
    pub async fn load_older(&self) -> Result<Option<usize>, ChatError> {
        let (id, state, epoch, cursor) = {
            let active = self.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Ok(None);
            };
            let mut st = active.state.lock().await;
            if !st.pager.begin_load() {
                return Ok(None);
            }
            (
                active.id.clone(),
                active.state.clone(),
                self.epoch.load(Ordering::SeqCst),
                st.engine.next_cursor(),
            )
        };
        self.run_page_fetch(&id, &state, cursor, epoch).await.map(Some)
    }

    async fn run_page_fetch(
        &self,
        id: &ConversationId,
        state: &Arc<Mutex<ConversationState>>,
        cursor: Option<String>,
        epoch: u64,
    ) -> Result<usize, ChatError> {
        let page = match self
            .transport
            .fetch_page(id, cursor, self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                state.lock().await.pager.page_load_failed();
                return Err(ChatError::Transport(e));
            }
        };
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // The user navigated away while the fetch was in flight.
            debug!(target: "Client", "discarding stale page response for {id}");
            return Err(ChatError::StaleRequest);
        }

        let mut st = state.lock().await;
        let has_more = page.has_more;
        let inserted = st.engine.apply_page(page);
        for message in st.engine.ordered_messages().to_vec() {
            st.receipts.observe_message(&message);
        }
        st.pager.page_loaded(has_more);
        drop(st);
        self.emit_list_change(id, ListChange::PageLoaded);
        Ok(inserted)
    }

    /// Optimistically send a message. The temp entry is visible immediately;
    /// transport failure leaves it in `Failed` state for manual retry rather
    /// than erroring here. Returns the temporary id.
    pub async fn send(
        &self,
        body: String,
        rich_body: Option<serde_json::Value>,
        attachments: Vec<Attachment>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        let (id, state, outgoing, temp_id, stop_signal) = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(ChatError::StaleRequest)?;
            let mut st = active.state.lock().await;

            let reply_preview = match &reply_to {
                Some(target_id) => Some(reply_preview_for(
                    st.engine
                        .get(target_id)
                        .ok_or_else(|| ChatError::UnknownMessage(target_id.clone()))?,
                )),
                None => None,
            };
            let outgoing = build_outgoing(body, rich_body, attachments, reply_preview)?;
            let local = make_local_message(&active.id, &self.viewer_id, &self.viewer_name, &outgoing);
            let temp_id = local.id.clone();

            st.receipts.observe_message(&local);
            self.registry.note_message(&local, true);
            st.engine.insert_local(local);
            st.queue.begin(&temp_id);
            let stop_signal = st.typing.stop_local_typing();
            (active.id.clone(), active.state.clone(), outgoing, temp_id, stop_signal)
        };
        self.emit_list_change(&id, ListChange::Inserted);

        if stop_signal == Some(TypingSignal::Stopped)
            && let Err(e) = self.transport.send_typing_signal(&id, false).await
        {
            warn!(target: "Typing", "failed to send stop signal for {id}: {e:?}");
        }

        let result = self.transport.send_message(&id, &outgoing).await;
        self.finish_send(&id, &state, &temp_id, result).await;
        Ok(temp_id)
    }

    /// Re-attempt a failed send with its original content. A no-op while an
    /// attempt for the same temp id is already in flight, so concurrent
    /// retries never produce a duplicate.
    pub async fn retry(&self, temp_id: &str) -> Result<(), ChatError> {
        let (id, state, outgoing) = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(ChatError::StaleRequest)?;
            let mut st = active.state.lock().await;

            let message = st
                .engine
                .get(temp_id)
                .ok_or_else(|| ChatError::UnknownMessage(temp_id.to_string()))?;
            match message.send_state {
                SendState::Confirmed => return Ok(()),
                SendState::Sending => return Ok(()), // attempt already running
                SendState::Failed => {}
            }
            let outgoing = outgoing_from_message(message);
            if !st.queue.begin(temp_id) {
                return Ok(());
            }
            st.engine.mark_sending(temp_id)?;
            (active.id.clone(), active.state.clone(), outgoing)
        };
        self.emit_list_change(&id, ListChange::Updated);

        let result = self.transport.send_message(&id, &outgoing).await;
        self.finish_send(&id, &state, temp_id, result).await;
        Ok(())
    }

    async fn finish_send(
        &self,
        conversation_id: &ConversationId,
        state: &Arc<Mutex<ConversationState>>,
        temp_id: &str,
        result: Result<Message, anyhow::Error>,
    ) {
        let mut st = state.lock().await;
        st.queue.finish(temp_id);
        match result {
            Ok(confirmed) => {
                st.receipts.observe_message(&confirmed);
                match st.engine.reconcile(temp_id, confirmed.clone()) {
                    Ok(change) => {
                        drop(st);
                        self.registry.note_message(&confirmed, true);
                        let _ = self.bus.message_confirmed.send(Arc::new(MessageConfirmed {
                            conversation_id: conversation_id.clone(),
                            temp_id: temp_id.to_string(),
                            message: Box::new(confirmed),
                        }));
                        self.emit_list_change(conversation_id, change);
                    }
                    Err(_) => {
                        // Temp entry vanished mid-flight (deleted or reset).
                        // The message exists remotely now; apply it the way
                        // a live delivery would so the confirmation is not
                        // lost.
                        warn!(target: "SendQueue", "temp entry {temp_id} gone, applying confirmed message directly");
                        if st.engine.apply_incoming(confirmed.clone().into()) {
                            drop(st);
                            self.registry.note_message(&confirmed, true);
                            self.emit_list_change(conversation_id, ListChange::Inserted);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(target: "SendQueue", "send of {temp_id} failed: {e:?}");
                if st.engine.mark_failed(temp_id).is_ok() {
                    drop(st);
                    let _ = self.bus.send_failed.send(Arc::new(SendFailed {
                        conversation_id: conversation_id.clone(),
                        temp_id: temp_id.to_string(),
                    }));
                    self.emit_list_change(conversation_id, ListChange::Updated);
                }
            }
        }
    }

    /// Edit a message, optimistic-concurrency checked. The caller passes the
    /// version it last saw; a mismatch returns [`ChatError::Conflict`] and
    /// leaves the message untouched.
    pub async fn edit_message(
        &self,
        id: &str,
        new_body: String,
        new_rich_body: Option<serde_json::Value>,
        expected_version: u32,
    ) -> Result<(), ChatError> {
        let conversation_id = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(ChatError::StaleRequest)?;
            let mut st = active.state.lock().await;

            let message = st
                .engine
                .get(id)
                .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
            if !can_edit(
                message,
                &self.viewer_id,
                self.viewer_elevated,
                self.config.edit_window,
            ) {
                return Err(ChatError::NotPermitted("cannot edit this message"));
            }
            st.engine
                .apply_edit(id, new_body, new_rich_body, expected_version)?;
            active.id.clone()
        };
        self.emit_list_change(&conversation_id, ListChange::Updated);
        Ok(())
    }

    /// Delete a message (author, or elevated role for any message).
    pub async fn delete_message(&self, id: &str) -> Result<(), ChatError> {
        let conversation_id = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(ChatError::StaleRequest)?;
            let mut st = active.state.lock().await;

            let message = st
                .engine
                .get(id)
                .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
            if !can_delete(message, &self.viewer_id, self.viewer_elevated) {
                return Err(ChatError::NotPermitted("cannot delete this message"));
            }
            st.engine.apply_delete(id);
            active.id.clone()
        };
        self.emit_list_change(&conversation_id, ListChange::Removed);
        Ok(())
    }

    /// Called on every composer input change. Broadcasts a debounced typing
    /// signal and (re)arms the single stop-typing timer.
    pub async fn input_changed(&self) -> Result<(), ChatError> {
        let (id, signal) = {
            let mut active = self.active.lock().await;
            let Some(active) = active.as_mut() else {
                return Ok(());
            };
            let signal = active.state.lock().await.typing.on_local_typing();
            let id = active.id.clone();

            // Replace, never accumulate, the pending stop timer.
            if let Some(task) = active.stop_typing_task.take() {
                task.abort();
            }
            active.stop_typing_task = Some(tokio::spawn(stop_typing_after_idle(
                self.transport.clone(),
                active.state.clone(),
                id.clone(),
                self.config.typing_idle_stop,
            )));
            (id, signal)
        };

        if signal == Some(TypingSignal::Started)
            && let Err(e) = self.transport.send_typing_signal(&id, true).await
        {
            warn!(target: "Typing", "failed to send typing signal for {id}: {e:?}");
        }
        Ok(())
    }

    /// Mark the conversation read up to the newest confirmed message. A
    /// no-op while an older-page fetch is in flight, so unseen history is
    /// never marked.
    pub async fn mark_read(&self) -> Result<(), ChatError> {
        let (id, watermark) = {
            let active = self.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Ok(());
            };
            let st = active.state.lock().await;
            if !st.pager.can_mark_read() {
                return Ok(());
            }
            let Some(watermark) = st.engine.latest_confirmed_id().cloned() else {
                return Ok(());
            };
            (active.id.clone(), watermark)
        };
        self.transport.mark_read(&id, &watermark).await?;
        self.registry.mark_viewed(&id);
        self.emit_unread();
        Ok(())
    }

    /// Snapshot of the ordered message list for rendering.
    pub async fn messages(&self) -> Vec<Message> {
        match self.active.lock().await.as_ref() {
            Some(active) => active.state.lock().await.engine.ordered_messages().to_vec(),
            None => Vec::new(),
        }
    }

    /// Current typing indicator text, if any.
    pub async fn typing_caption(&self) -> Option<String> {
        let active = self.active.lock().await;
        let active = active.as_ref()?;
        let typers = active.state.lock().await.typing.active_typers();
        typing_caption(&typers)
    }

    /// Readers of a message, author excluded.
    pub async fn readers_of(&self, message_id: &str) -> Vec<UserId> {
        match self.active.lock().await.as_ref() {
            Some(active) => active.state.lock().await.receipts.readers_of(message_id),
            None => Vec::new(),
        }
    }

    /// Whether the "new messages" affordance should be shown.
    pub async fn has_pending_new_messages(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(active) => active.state.lock().await.pager.has_pending_new_messages(),
            None => false,
        }
    }

    /// The affordance was used; jump-to-bottom implies the next mark-read.
    pub async fn acknowledge_new_messages(&self) -> Result<(), ChatError> {
        {
            let active = self.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Ok(());
            };
            active.state.lock().await.pager.acknowledge_new_messages();
        }
        self.mark_read().await
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit_list_change(&self, conversation_id: &ConversationId, change: ListChange) {
        let _ = self.bus.message_list_changed.send(Arc::new(MessageListChanged {
            conversation_id: conversation_id.clone(),
            change,
        }));
    }

    fn emit_unread(&self) {
        let totals = self.registry.totals();
        let _ = self.bus.unread_changed.send(Arc::new(UnreadChanged {
            total_unread: totals.total_unread,
            total_unread_mentions: totals.total_unread_mentions,
        }));
    }
}

/// Idle timer armed per input refresh; emits the stop signal once the idle
/// window elapses without being replaced.
async fn stop_typing_after_idle(
    transport: Arc<dyn ChatTransport>,
    state: Arc<Mutex<ConversationState>>,
    conversation_id: ConversationId,
    idle_stop: std::time::Duration,
) {
    tokio::time::sleep(idle_stop).await;
    let stopped = state.lock().await.typing.poll_idle();
    if stopped == Some(TypingSignal::Stopped)
        && let Err(e) = transport.send_typing_signal(&conversation_id, false).await
    {
        warn!(target: "Typing", "failed to send stop signal for {conversation_id}: {e:?}");
    }
}

/// Background task draining the live subscription. Each delivery is applied
/// atomically with respect to every other mutation of the conversation.
async fn drain_live_events(
    mut rx: mpsc::Receiver<LiveEvent>,
    state: Arc<Mutex<ConversationState>>,
    registry: Arc<ConversationRegistry>,
    bus: Arc<EventBus>,
    conversation_id: ConversationId,
    viewer_id: UserId,
) {
    while let Some(event) = rx.recv().await {
        let mut st = state.lock().await;
        match event {
            LiveEvent::Message(envelope) => {
                let incoming_id = envelope.id.clone();
                if !st.engine.apply_incoming(envelope) {
                    continue;
                }
                let Some(message) = incoming_id.and_then(|id| st.engine.get(&id).cloned()) else {
                    continue;
                };
                st.receipts.observe_message(&message);
                st.pager.on_incoming_message();
                drop(st);
                registry.note_message(&message, true);
                let _ = bus.message_list_changed.send(Arc::new(MessageListChanged {
                    conversation_id: conversation_id.clone(),
                    change: ListChange::Inserted,
                }));
            }
            LiveEvent::Edited {
                id,
                body,
                rich_body,
                version,
            } => {
                if st.engine.apply_remote_edit(&id, body, rich_body, version) {
                    drop(st);
                    let _ = bus.message_list_changed.send(Arc::new(MessageListChanged {
                        conversation_id: conversation_id.clone(),
                        change: ListChange::Updated,
                    }));
                }
            }
            LiveEvent::Deleted { id } => {
                if st.engine.apply_delete(&id) {
                    drop(st);
                    let _ = bus.message_list_changed.send(Arc::new(MessageListChanged {
                        conversation_id: conversation_id.clone(),
                        change: ListChange::Removed,
                    }));
                }
            }
            LiveEvent::Typing {
                user_id,
                name,
                is_typing,
            } => {
                if user_id == viewer_id {
                    continue;
                }
                if is_typing {
                    st.typing.on_remote_signal(user_id, name);
                } else {
                    st.typing.on_remote_stop(&user_id);
                }
                let typers = st.typing.active_typers();
                drop(st);
                let _ = bus.typing_changed.send(Arc::new(TypingChanged {
                    conversation_id: conversation_id.clone(),
                    typers,
                }));
            }
            LiveEvent::ReadReceipt {
                message_id,
                reader_id,
                read_at,
            } => {
                if st.receipts.record_read(&message_id, reader_id, read_at) {
                    drop(st);
                    let _ = bus.receipts_changed.send(Arc::new(ReceiptsChanged {
                        conversation_id: conversation_id.clone(),
                        message_id,
                    }));
                }
            }
        }
    }
    debug!(target: "Client", "live subscription for {conversation_id} ended");
}
