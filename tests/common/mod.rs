//! Scripted conversational endpoint and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use topic_chat::config::TopicConfig;
use topic_chat::error::{PersistenceError, SendError};
use topic_chat::llm::{ChatEndpoint, ChatSession};
use topic_chat::locale::Locale;
use topic_chat::resources::ResourcePool;
use topic_chat::session::SessionManager;
use topic_chat::topic_store::{MemoryTopicStore, StoredTopic, TopicStore};

type Responder = dyn Fn(&str) -> Result<String, SendError> + Send + Sync;
type Delay = dyn Fn(&str) -> Duration + Send + Sync;

/// Counters observable from tests.
#[derive(Default)]
pub struct Calls {
    pub instructions: Mutex<Vec<String>>,
    pub sends: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Calls {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.instructions.lock().unwrap().len()
    }

    pub fn last_instruction(&self) -> String {
        self.instructions.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

/// Holds sends until the test releases them.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

pub struct FakeEndpoint {
    pub calls: Arc<Calls>,
    responder: Arc<Responder>,
    delay: Option<Arc<Delay>>,
    gate: Option<Arc<Gate>>,
    open_gate: Mutex<Option<Arc<Gate>>>,
    fail_open: bool,
}

impl FakeEndpoint {
    pub fn new(responder: impl Fn(&str) -> Result<String, SendError> + Send + Sync + 'static) -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            responder: Arc::new(responder),
            delay: None,
            gate: None,
            open_gate: Mutex::new(None),
            fail_open: false,
        }
    }

    pub fn echo() -> Self {
        Self::new(|text| Ok(format!("echo: {text}")))
    }

    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Arc::new(delay));
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Holds the next `open_session` call until the gate is released.
    /// Later opens go straight through.
    pub fn with_open_gate(self, gate: Arc<Gate>) -> Self {
        *self.open_gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl ChatEndpoint for FakeEndpoint {
    async fn open_session(&self, instruction: &str) -> Result<Box<dyn ChatSession>, SendError> {
        if self.fail_open {
            return Err(SendError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            });
        }
        let open_gate = self.open_gate.lock().unwrap().take();
        if let Some(gate) = open_gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.calls
            .instructions
            .lock()
            .unwrap()
            .push(instruction.to_string());
        Ok(Box::new(FakeSession {
            calls: Arc::clone(&self.calls),
            responder: Arc::clone(&self.responder),
            delay: self.delay.clone(),
            gate: self.gate.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    calls: Arc<Calls>,
    responder: Arc<Responder>,
    delay: Option<Arc<Delay>>,
    gate: Option<Arc<Gate>>,
    closed: bool,
}

#[async_trait]
impl ChatSession for FakeSession {
    async fn send(&mut self, text: &str) -> Result<String, SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.calls.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(text)).await;
        }
        (self.responder)(text)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryTopicStore,
    pub saves: AtomicUsize,
}

impl CountingStore {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicStore for CountingStore {
    async fn save(
        &self,
        topic_id: &str,
        source_text: &str,
        file_names: &[String],
    ) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(topic_id, source_text, file_names).await
    }

    async fn load(&self, topic_id: &str) -> Result<Option<StoredTopic>, PersistenceError> {
        self.inner.load(topic_id).await
    }

    async fn clear(&self, topic_id: &str) -> Result<(), PersistenceError> {
        self.inner.clear(topic_id).await
    }
}

pub fn catalog() -> Vec<TopicConfig> {
    vec![
        TopicConfig {
            id: "specs".to_string(),
            label: "Product specs".to_string(),
        },
        TopicConfig {
            id: "glazing".to_string(),
            label: "Glazing".to_string(),
        },
    ]
}

pub fn manager(
    store: Arc<dyn TopicStore>,
    endpoint: Arc<dyn ChatEndpoint>,
    pool: ResourcePool,
) -> SessionManager {
    SessionManager::new(&catalog(), Locale::En, store, endpoint, pool)
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
