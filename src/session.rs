//! Per-topic session lifecycle, message log and in-flight tracking.
//!
//! The [`SessionManager`] owns one slot per catalog topic. A slot is either
//! **Empty** (no session, no source text, no messages) or **Loaded** (an
//! open [`ChatSession`], non-empty source text, at least the seed greeting).
//!
//! ```text
//!            create_or_replace / rehydrate
//!   Empty ─────────────────────────────────▶ Loaded
//!     ▲                                        │
//!     └──────────────── reset ─────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Topics are independent. Within a topic, `send` and `create_or_replace`
//! are serialized by the slot's [`InFlight`] value: a call issued while
//! another is outstanding fails with `Busy` instead of queueing. `reset` may
//! run at any time. Every session carries a [`SessionId`]; a response whose
//! session is no longer the active one when it arrives is dropped.
//!
//! Slot state sits behind a `std::sync::Mutex` that is never held across an
//! await point. The session itself sits behind a `tokio::sync::Mutex`
//! because a turn holds it for the whole network round trip.
//!
//! Store writes for a topic go through a per-topic async lock. An upload
//! saves only after its documents are committed and only while it still
//! holds the topic, and `reset` clears the store under the same lock, so the
//! store always ends up matching the last upload or reset to finish.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::citation::CitationParser;
use crate::config::TopicConfig;
use crate::error::{ExtractionError, SessionError, UploadError};
use crate::extract;
use crate::highlight::{self, Resolution};
use crate::instruction;
use crate::llm::{ChatEndpoint, ChatSession};
use crate::locale::Locale;
use crate::models::{Citation, Message, TopicState, Upload};
use crate::resources::{ResourceHandle, ResourcePool};
use crate::topic_store::TopicStore;

/// Identity of one opened session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a topic is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlight {
    Idle,
    /// Opening the session with this id (upload or rehydration).
    Uploading(SessionId),
    /// A turn is outstanding on this session.
    Sending(SessionId),
}

/// Read-only view of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSnapshot {
    pub topic_id: String,
    pub label: String,
    pub state: TopicState,
    pub file_names: Vec<String>,
    pub display_name: Option<String>,
    pub message_count: usize,
    /// Files whose bytes are held in memory and can be opened on a page.
    pub viewable: Vec<String>,
    pub busy: bool,
}

/// Everything an upload built before touching the slot.
struct PreparedUpload {
    session_id: SessionId,
    session: Box<dyn ChatSession>,
    files: Vec<Upload>,
    file_names: Vec<String>,
    source_text: String,
    greeting: Message,
}

struct ActiveSession {
    id: SessionId,
    handle: Arc<tokio::sync::Mutex<Box<dyn ChatSession>>>,
}

struct TopicSlot {
    label: String,
    source_text: String,
    file_names: Vec<String>,
    session: Option<ActiveSession>,
    messages: Vec<Message>,
    resources: HashMap<String, ResourceHandle>,
    in_flight: InFlight,
}

impl TopicSlot {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            source_text: String::new(),
            file_names: Vec::new(),
            session: None,
            messages: Vec::new(),
            resources: HashMap::new(),
            in_flight: InFlight::Idle,
        }
    }

    fn state(&self) -> TopicState {
        if self.session.is_some() {
            TopicState::Loaded
        } else {
            TopicState::Empty
        }
    }

    fn active_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Clears the in-flight value if it still belongs to the caller.
    fn finish(&mut self, owner: InFlight) {
        if self.in_flight == owner {
            self.in_flight = InFlight::Idle;
        }
    }

    /// Moves the slot to Empty, handing back what must be closed and released.
    fn clear(&mut self) -> (Option<ActiveSession>, Vec<ResourceHandle>) {
        self.source_text.clear();
        self.file_names.clear();
        self.messages.clear();
        self.in_flight = InFlight::Idle;
        let resources = self.resources.drain().map(|(_, handle)| handle).collect();
        (self.session.take(), resources)
    }

    fn snapshot(&self, topic_id: &str, locale: Locale) -> TopicSnapshot {
        let mut viewable: Vec<String> = self.resources.keys().cloned().collect();
        viewable.sort();
        TopicSnapshot {
            topic_id: topic_id.to_string(),
            label: self.label.clone(),
            state: self.state(),
            file_names: self.file_names.clone(),
            display_name: (!self.file_names.is_empty())
                .then(|| locale.display_file_name(&self.file_names)),
            message_count: self.messages.len(),
            viewable,
            busy: self.in_flight != InFlight::Idle,
        }
    }
}

/// Closes a session now if it is free, otherwise once its outstanding turn
/// releases it.
fn close_session(active: ActiveSession) {
    let handle = Arc::clone(&active.handle);
    if let Ok(mut session) = active.handle.try_lock() {
        session.close();
        return;
    }
    tracing::debug!(session = %active.id, "session busy; closing after its turn");
    tokio::spawn(async move {
        handle.lock().await.close();
    });
}

pub struct SessionManager {
    locale: Locale,
    store: Arc<dyn TopicStore>,
    endpoint: Arc<dyn ChatEndpoint>,
    pool: ResourcePool,
    order: Vec<String>,
    topics: HashMap<String, Mutex<TopicSlot>>,
    store_locks: HashMap<String, tokio::sync::Mutex<()>>,
}

impl SessionManager {
    /// Creates a manager with one Empty slot per catalog entry.
    pub fn new(
        catalog: &[TopicConfig],
        locale: Locale,
        store: Arc<dyn TopicStore>,
        endpoint: Arc<dyn ChatEndpoint>,
        pool: ResourcePool,
    ) -> Self {
        let order = catalog.iter().map(|t| t.id.clone()).collect();
        let topics = catalog
            .iter()
            .map(|t| (t.id.clone(), Mutex::new(TopicSlot::new(&t.label))))
            .collect();
        let store_locks = catalog
            .iter()
            .map(|t| (t.id.clone(), tokio::sync::Mutex::new(())))
            .collect();
        Self {
            locale,
            store,
            endpoint,
            pool,
            order,
            topics,
            store_locks,
        }
    }

    fn slot(&self, topic_id: &str) -> Option<&Mutex<TopicSlot>> {
        self.topics.get(topic_id)
    }

    fn require(&self, topic_id: &str) -> Result<&Mutex<TopicSlot>, SessionError> {
        self.slot(topic_id)
            .ok_or_else(|| SessionError::UnknownTopic(topic_id.to_string()))
    }

    // ============ Upload ============

    /// Replaces a topic's documents with `uploads` and opens a new session.
    ///
    /// Every file is extracted before anything changes; one failing file
    /// aborts the upload with no store write and the topic untouched.
    /// Persisting happens once the new documents are in place and is
    /// best-effort: a store failure is logged and the topic stays Loaded.
    pub async fn create_or_replace(
        &self,
        topic_id: &str,
        uploads: Vec<Upload>,
    ) -> Result<TopicSnapshot, UploadError> {
        let slot = self
            .slot(topic_id)
            .ok_or_else(|| UploadError::UnknownTopic(topic_id.to_string()))?;
        if uploads.is_empty() {
            return Err(UploadError::NoFiles);
        }

        let session_id = SessionId::new();
        let label = {
            let mut topic = slot.lock().unwrap();
            if topic.in_flight != InFlight::Idle {
                return Err(UploadError::Busy(topic_id.to_string()));
            }
            topic.in_flight = InFlight::Uploading(session_id);
            topic.label.clone()
        };

        let result = self
            .load_documents(topic_id, &label, slot, session_id, uploads)
            .await;

        let mut topic = slot.lock().unwrap();
        topic.finish(InFlight::Uploading(session_id));
        result.map(|()| topic.snapshot(topic_id, self.locale))
    }

    async fn load_documents(
        &self,
        topic_id: &str,
        label: &str,
        slot: &Mutex<TopicSlot>,
        session_id: SessionId,
        uploads: Vec<Upload>,
    ) -> Result<(), UploadError> {
        let mut documents = Vec::with_capacity(uploads.len());
        let mut files = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let file_name = upload.file_name.clone();
            let (upload, extracted) = tokio::task::spawn_blocking(move || {
                let extracted = extract::extract(&upload.bytes, &upload.file_name);
                (upload, extracted)
            })
            .await
            .map_err(|e| UploadError::Extraction {
                file_name: file_name.clone(),
                source: ExtractionError::Aborted(e.to_string()),
            })?;
            let document =
                extracted.map_err(|source| UploadError::Extraction { file_name, source })?;
            tracing::debug!(
                topic = topic_id,
                file_name = %document.file_name,
                pages = document.pages.len(),
                "extracted document"
            );
            documents.push(document);
            files.push(upload);
        }

        let file_names: Vec<String> = documents.iter().map(|d| d.file_name.clone()).collect();
        let source_text = instruction::build_source_text(self.locale, &documents);
        let instruction =
            instruction::build_instruction(self.locale, label, &file_names, &source_text);

        let session = self
            .endpoint
            .open_session(&instruction)
            .await
            .map_err(UploadError::Endpoint)?;

        let greeting = Message::assistant(self.locale.upload_greeting(&file_names, label), Vec::new());
        let prepared = PreparedUpload {
            session_id,
            session,
            files,
            file_names: file_names.clone(),
            source_text: source_text.clone(),
            greeting,
        };
        match self.commit_upload(slot, prepared) {
            Ok(Some(previous)) => close_session(previous),
            Ok(None) => {}
            Err(mut session) => {
                session.close();
                tracing::info!(topic = topic_id, "upload cancelled by a concurrent reset");
                return Err(UploadError::Cancelled(topic_id.to_string()));
            }
        }
        tracing::info!(topic = topic_id, documents = documents.len(), session = %session_id, "topic loaded from upload");

        self.persist(topic_id, slot, session_id, &source_text, &file_names)
            .await;
        Ok(())
    }

    /// Saves a committed upload unless a reset took the topic first.
    /// Failures are logged; the topic stays usable in memory.
    async fn persist(
        &self,
        topic_id: &str,
        slot: &Mutex<TopicSlot>,
        session_id: SessionId,
        source_text: &str,
        file_names: &[String],
    ) {
        let _store_guard = self.store_locks[topic_id].lock().await;
        let owned = slot.lock().unwrap().in_flight == InFlight::Uploading(session_id);
        if !owned {
            tracing::info!(topic = topic_id, "topic reset before its upload was persisted");
            return;
        }
        if let Err(e) = self.store.save(topic_id, source_text, file_names).await {
            tracing::warn!(topic = topic_id, error = %e, "failed to persist topic; keeping it in memory only");
        }
    }

    /// Swaps the new session and documents into the slot, returning the
    /// session it replaced. Hands the new session back if a reset cleared
    /// the reservation in the meantime.
    fn commit_upload(
        &self,
        slot: &Mutex<TopicSlot>,
        prepared: PreparedUpload,
    ) -> Result<Option<ActiveSession>, Box<dyn ChatSession>> {
        let mut topic = slot.lock().unwrap();
        if topic.in_flight != InFlight::Uploading(prepared.session_id) {
            return Err(prepared.session);
        }

        let previous = topic.session.replace(ActiveSession {
            id: prepared.session_id,
            handle: Arc::new(tokio::sync::Mutex::new(prepared.session)),
        });
        for (_, handle) in topic.resources.drain() {
            self.pool.release(handle);
        }
        for upload in prepared.files {
            let handle = self.pool.register(&upload.file_name, upload.bytes);
            if let Some(replaced) = topic.resources.insert(upload.file_name, handle) {
                self.pool.release(replaced);
            }
        }
        topic.file_names = prepared.file_names;
        topic.source_text = prepared.source_text;
        topic.messages = vec![prepared.greeting];
        Ok(previous)
    }

    // ============ Rehydration ============

    /// Restores a topic from the store with a fresh session and greeting.
    ///
    /// Prior conversation turns are not restored, and no viewable resources
    /// exist afterwards. A topic already Loaded is left as it is; a topic
    /// with nothing persisted stays Empty.
    pub async fn rehydrate(&self, topic_id: &str) -> Result<TopicState, SessionError> {
        let slot = self.require(topic_id)?;
        let session_id = SessionId::new();
        let label = {
            let mut topic = slot.lock().unwrap();
            if topic.session.is_some() {
                return Ok(TopicState::Loaded);
            }
            if topic.in_flight != InFlight::Idle {
                return Err(SessionError::Busy(topic_id.to_string()));
            }
            topic.in_flight = InFlight::Uploading(session_id);
            topic.label.clone()
        };

        let result = self.restore(topic_id, &label, slot, session_id).await;

        slot.lock()
            .unwrap()
            .finish(InFlight::Uploading(session_id));
        result
    }

    async fn restore(
        &self,
        topic_id: &str,
        label: &str,
        slot: &Mutex<TopicSlot>,
        session_id: SessionId,
    ) -> Result<TopicState, SessionError> {
        let stored = match self.store.load(topic_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(TopicState::Empty),
            Err(e) => {
                tracing::warn!(topic = topic_id, error = %e, "failed to load persisted topic");
                return Ok(TopicState::Empty);
            }
        };

        let instruction = instruction::build_instruction(
            self.locale,
            label,
            &stored.file_names,
            &stored.source_text,
        );
        let mut session = self
            .endpoint
            .open_session(&instruction)
            .await
            .map_err(SessionError::Endpoint)?;

        let display_name = self.locale.display_file_name(&stored.file_names);
        let greeting = Message::assistant(self.locale.rehydrate_greeting(&display_name), Vec::new());
        {
            let mut topic = slot.lock().unwrap();
            if topic.in_flight == InFlight::Uploading(session_id) {
                topic.session = Some(ActiveSession {
                    id: session_id,
                    handle: Arc::new(tokio::sync::Mutex::new(session)),
                });
                topic.source_text = stored.source_text;
                topic.file_names = stored.file_names;
                topic.messages = vec![greeting];
                tracing::info!(topic = topic_id, session = %session_id, "topic rehydrated");
                return Ok(TopicState::Loaded);
            }
        }

        session.close();
        tracing::info!(topic = topic_id, "rehydration cancelled by a concurrent reset");
        Ok(TopicState::Empty)
    }

    /// Rehydrates every catalog topic, returning how many ended up Loaded.
    /// Failures are logged per topic.
    pub async fn rehydrate_all(&self) -> usize {
        let mut loaded = 0;
        for topic_id in &self.order {
            match self.rehydrate(topic_id).await {
                Ok(TopicState::Loaded) => loaded += 1,
                Ok(TopicState::Empty) => {}
                Err(e) => tracing::warn!(topic = %topic_id, error = %e, "failed to rehydrate topic"),
            }
        }
        loaded
    }

    // ============ Conversation ============

    /// Sends one user turn.
    ///
    /// Returns `Ok(None)` without contacting the endpoint when the topic is
    /// Empty. The user message is logged before the request goes out; the
    /// reply is either the parsed response or the localized failure message,
    /// so an endpoint error never reaches the caller. A reply whose session
    /// was replaced or reset in the meantime is dropped and `Ok(None)` is
    /// returned.
    pub async fn send(&self, topic_id: &str, text: &str) -> Result<Option<Message>, SessionError> {
        let slot = self.require(topic_id)?;
        let (session_id, handle) = {
            let mut topic = slot.lock().unwrap();
            let Some(active) = topic.session.as_ref() else {
                tracing::debug!(topic = topic_id, "send on an empty topic ignored");
                return Ok(None);
            };
            let session_id = active.id;
            let handle = Arc::clone(&active.handle);
            if topic.in_flight != InFlight::Idle {
                return Err(SessionError::Busy(topic_id.to_string()));
            }
            topic.messages.push(Message::user(text));
            topic.in_flight = InFlight::Sending(session_id);
            (session_id, handle)
        };

        let result = handle.lock().await.send(text).await;
        let reply = match result {
            Ok(raw) => {
                let parsed = CitationParser::for_locale(self.locale).parse(&raw);
                tracing::debug!(topic = topic_id, citations = parsed.citations.len(), "response received");
                Message::assistant(parsed.display_text, parsed.citations)
            }
            Err(e) => {
                tracing::warn!(topic = topic_id, error = %e, "send failed");
                Message::assistant(self.locale.send_failure(), Vec::new())
            }
        };

        let mut topic = slot.lock().unwrap();
        topic.finish(InFlight::Sending(session_id));
        if topic.active_id() != Some(session_id) {
            tracing::info!(topic = topic_id, session = %session_id, "discarding response for an inactive session");
            return Ok(None);
        }
        topic.messages.push(reply.clone());
        Ok(Some(reply))
    }

    // ============ Teardown ============

    /// Returns a topic to Empty: clears the store, closes the session and
    /// releases its viewable resources. Allowed while a request is in flight.
    pub async fn reset(&self, topic_id: &str) -> Result<(), SessionError> {
        let slot = self.require(topic_id)?;
        let (session, resources) = slot.lock().unwrap().clear();
        for handle in resources {
            self.pool.release(handle);
        }
        if let Some(session) = session {
            close_session(session);
        }
        let _store_guard = self.store_locks[topic_id].lock().await;
        if let Err(e) = self.store.clear(topic_id).await {
            tracing::warn!(topic = topic_id, error = %e, "failed to clear persisted topic");
        }
        tracing::info!(topic = topic_id, "topic reset");
        Ok(())
    }

    /// Closes every session and releases every resource. Persisted state is
    /// kept so the next process can rehydrate.
    pub async fn shutdown(&self) {
        let mut sessions = Vec::new();
        for topic_id in &self.order {
            let (session, resources) = self.topics[topic_id].lock().unwrap().clear();
            for handle in resources {
                self.pool.release(handle);
            }
            sessions.extend(session);
        }
        for active in sessions {
            active.handle.lock().await.close();
        }
        tracing::info!(outstanding = self.pool.outstanding(), "session manager shut down");
    }

    // ============ Accessors ============

    /// Snapshots of every topic in catalog order.
    pub fn topics(&self) -> Vec<TopicSnapshot> {
        self.order
            .iter()
            .map(|id| self.topics[id].lock().unwrap().snapshot(id, self.locale))
            .collect()
    }

    pub fn snapshot(&self, topic_id: &str) -> Result<TopicSnapshot, SessionError> {
        Ok(self
            .require(topic_id)?
            .lock()
            .unwrap()
            .snapshot(topic_id, self.locale))
    }

    pub fn messages(&self, topic_id: &str) -> Result<Vec<Message>, SessionError> {
        Ok(self.require(topic_id)?.lock().unwrap().messages.clone())
    }

    pub fn source_text(&self, topic_id: &str) -> Result<String, SessionError> {
        Ok(self.require(topic_id)?.lock().unwrap().source_text.clone())
    }

    pub fn is_busy(&self, topic_id: &str) -> Result<bool, SessionError> {
        Ok(self.require(topic_id)?.lock().unwrap().in_flight != InFlight::Idle)
    }

    /// Maps a citation to a page view using the topic's viewable resources.
    pub fn resolve_citation(
        &self,
        topic_id: &str,
        citation: &Citation,
    ) -> Result<Resolution, SessionError> {
        let topic = self.require(topic_id)?.lock().unwrap();
        Ok(highlight::resolve(&topic.resources, citation))
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }
}
