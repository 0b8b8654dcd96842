//! Session manager behaviour against a scripted endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{catalog, eventually, manager, CountingStore, FakeEndpoint, Gate};
use topic_chat::error::{ExtractionError, SendError, SessionError, UploadError};
use topic_chat::highlight::{PageRenderer, Resolution, TextPageRenderer};
use topic_chat::locale::Locale;
use topic_chat::models::{Citation, Role, TopicState, Upload};
use topic_chat::resources::ResourcePool;
use topic_chat::session::SessionManager;
use topic_chat::topic_store::{MemoryTopicStore, TopicStore};

fn spec_upload() -> Upload {
    Upload::new("spec.txt", b"Hello world.\x0cGoodbye.".to_vec())
}

fn texts(manager: &SessionManager, topic: &str) -> Vec<(Role, String)> {
    manager
        .messages(topic)
        .unwrap()
        .into_iter()
        .map(|m| (m.role, m.text))
        .collect()
}

#[tokio::test]
async fn upload_ask_and_open_cited_page() {
    let endpoint = Arc::new(FakeEndpoint::new(|text| {
        if text.contains("page 2") {
            Ok(r#"Page 2 says goodbye [source: spec.txt, page: 2, text: "Goodbye."]"#.to_string())
        } else {
            Ok("I could not find that in the documents.".to_string())
        }
    }));
    let calls = Arc::clone(&endpoint.calls);
    let pool = ResourcePool::new();
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        pool.clone(),
    );

    let snapshot = manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    assert_eq!(snapshot.state, TopicState::Loaded);
    assert_eq!(snapshot.file_names, vec!["spec.txt".to_string()]);
    assert_eq!(snapshot.viewable, vec!["spec.txt".to_string()]);
    assert_eq!(snapshot.message_count, 1);

    let instruction = calls.last_instruction();
    assert!(instruction.contains("Product specs"));
    assert!(instruction.contains("Page 1:\nHello world.\n---\nPage 2:\nGoodbye."));

    let greeting = &manager.messages("specs").unwrap()[0];
    assert_eq!(greeting.role, Role::Assistant);
    assert!(greeting.text.contains("spec.txt"));

    let reply = manager
        .send("specs", "what does it say on page 2?")
        .await
        .unwrap()
        .unwrap();
    let expected = Citation {
        file_name: "spec.txt".to_string(),
        page: 2,
        quoted_text: "Goodbye.".to_string(),
    };
    assert_eq!(reply.citations, vec![expected.clone()]);
    assert!(reply.text.contains("[source: spec.txt"));

    let Resolution::View(request) = manager.resolve_citation("specs", &expected).unwrap() else {
        panic!("citation should resolve to a view");
    };
    assert_eq!(request.file_name, "spec.txt");
    assert_eq!(request.page, 2);
    assert_eq!(request.highlight_text, "Goodbye.");

    let page = TextPageRenderer::new(pool).render(&request).unwrap();
    assert_eq!(page.marked("[", "]"), "[Goodbye.]");
}

#[tokio::test]
async fn sends_are_logged_in_order_regardless_of_latency() {
    let endpoint = FakeEndpoint::new(|text| Ok(format!("reply to {text}")))
        .with_delay(|text| {
            if text == "m1" {
                Duration::from_millis(80)
            } else {
                Duration::from_millis(1)
            }
        });
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        Arc::new(endpoint),
        ResourcePool::new(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();

    manager.send("specs", "m1").await.unwrap();
    manager.send("specs", "m2").await.unwrap();

    let log = texts(&manager, "specs");
    assert_eq!(log.len(), 5);
    assert_eq!(
        &log[1..],
        &[
            (Role::User, "m1".to_string()),
            (Role::Assistant, "reply to m1".to_string()),
            (Role::User, "m2".to_string()),
            (Role::Assistant, "reply to m2".to_string()),
        ]
    );
}

#[tokio::test]
async fn topics_proceed_independently() {
    let endpoint = FakeEndpoint::echo().with_delay(|_| Duration::from_millis(20));
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        Arc::new(endpoint),
        ResourcePool::new(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    manager
        .create_or_replace("glazing", vec![Upload::new("kiln.md", b"Cone 6.".to_vec())])
        .await
        .unwrap();

    let (a, b) = tokio::join!(manager.send("specs", "a"), manager.send("glazing", "b"));
    assert_eq!(a.unwrap().unwrap().text, "echo: a");
    assert_eq!(b.unwrap().unwrap().text, "echo: b");
}

#[tokio::test]
async fn send_on_empty_topic_is_a_no_op() {
    let endpoint = Arc::new(FakeEndpoint::echo());
    let calls = Arc::clone(&endpoint.calls);
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        ResourcePool::new(),
    );

    assert!(manager.send("specs", "hello?").await.unwrap().is_none());
    assert!(manager.messages("specs").unwrap().is_empty());
    assert_eq!(calls.sends(), 0);
}

#[tokio::test]
async fn failed_send_appends_error_message_and_conversation_continues() {
    let endpoint = FakeEndpoint::new(|text| {
        if text == "boom" {
            Err(SendError::Status {
                status: 503,
                body: "overloaded".to_string(),
            })
        } else {
            Ok("fine".to_string())
        }
    });
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        Arc::new(endpoint),
        ResourcePool::new(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();

    let reply = manager.send("specs", "boom").await.unwrap().unwrap();
    assert_eq!(reply.text, Locale::En.send_failure());
    assert!(reply.citations.is_empty());

    let reply = manager.send("specs", "again").await.unwrap().unwrap();
    assert_eq!(reply.text, "fine");
    assert_eq!(manager.messages("specs").unwrap().len(), 5);
}

#[tokio::test]
async fn zero_page_upload_fails_without_store_write() {
    let store = Arc::new(CountingStore::default());
    let manager = manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        Arc::new(FakeEndpoint::echo()),
        ResourcePool::new(),
    );

    let err = manager
        .create_or_replace("specs", vec![Upload::new("blank.txt", b"  \n\x0c\t".to_vec())])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Extraction {
            ref file_name,
            source: ExtractionError::NoPages(_),
        } if file_name == "blank.txt"
    ));
    assert_eq!(manager.snapshot("specs").unwrap().state, TopicState::Empty);
    assert_eq!(store.saves(), 0);
    assert!(!manager.is_busy("specs").unwrap());
}

#[tokio::test]
async fn one_bad_file_aborts_the_whole_upload() {
    let store = Arc::new(CountingStore::default());
    let pool = ResourcePool::new();
    let manager = manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        Arc::new(FakeEndpoint::echo()),
        pool.clone(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    let before = manager.source_text("specs").unwrap();

    let err = manager
        .create_or_replace(
            "specs",
            vec![
                Upload::new("good.txt", b"fine".to_vec()),
                Upload::new("slides.key", b"???".to_vec()),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Extraction {
            source: ExtractionError::UnsupportedContentType(_),
            ..
        }
    ));

    let snapshot = manager.snapshot("specs").unwrap();
    assert_eq!(snapshot.file_names, vec!["spec.txt".to_string()]);
    assert_eq!(manager.source_text("specs").unwrap(), before);
    assert_eq!(store.saves(), 1);
    assert_eq!(pool.outstanding(), 1);
}

#[tokio::test]
async fn endpoint_failure_leaves_topic_empty() {
    let store = Arc::new(CountingStore::default());
    let manager = manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        Arc::new(FakeEndpoint::echo().failing_open()),
        ResourcePool::new(),
    );

    let err = manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Endpoint(SendError::Status { status: 401, .. })));
    assert_eq!(manager.snapshot("specs").unwrap().state, TopicState::Empty);
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn empty_and_unknown_uploads_are_rejected() {
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        Arc::new(FakeEndpoint::echo()),
        ResourcePool::new(),
    );
    assert!(matches!(
        manager.create_or_replace("specs", Vec::new()).await,
        Err(UploadError::NoFiles)
    ));
    assert!(matches!(
        manager.create_or_replace("nope", vec![spec_upload()]).await,
        Err(UploadError::UnknownTopic(_))
    ));
    assert!(matches!(
        manager.send("nope", "hi").await,
        Err(SessionError::UnknownTopic(_))
    ));
}

#[tokio::test]
async fn reset_then_rehydrate_is_empty() {
    let store: Arc<dyn TopicStore> = Arc::new(MemoryTopicStore::default());
    let pool = ResourcePool::new();
    let manager = manager(Arc::clone(&store), Arc::new(FakeEndpoint::echo()), pool.clone());
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    assert!(store.load("specs").await.unwrap().is_some());

    manager.reset("specs").await.unwrap();
    assert_eq!(manager.snapshot("specs").unwrap().state, TopicState::Empty);
    assert!(manager.messages("specs").unwrap().is_empty());
    assert_eq!(pool.outstanding(), 0);
    assert!(store.load("specs").await.unwrap().is_none());

    assert_eq!(manager.rehydrate("specs").await.unwrap(), TopicState::Empty);
}

#[tokio::test]
async fn rehydration_restores_text_but_not_history_or_views() {
    let store: Arc<dyn TopicStore> = Arc::new(MemoryTopicStore::default());
    let first = manager(
        Arc::clone(&store),
        Arc::new(FakeEndpoint::echo()),
        ResourcePool::new(),
    );
    first
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    first.send("specs", "hello").await.unwrap();
    let original_text = first.source_text("specs").unwrap();
    first.shutdown().await;

    let endpoint = Arc::new(FakeEndpoint::echo());
    let calls = Arc::clone(&endpoint.calls);
    let pool = ResourcePool::new();
    let restarted = manager(Arc::clone(&store), endpoint, pool.clone());

    assert_eq!(restarted.rehydrate("specs").await.unwrap(), TopicState::Loaded);
    let snapshot = restarted.snapshot("specs").unwrap();
    assert_eq!(snapshot.file_names, vec!["spec.txt".to_string()]);
    assert!(snapshot.viewable.is_empty());
    assert_eq!(restarted.source_text("specs").unwrap(), original_text);
    assert!(calls.last_instruction().contains(&original_text));

    let messages = restarted.messages("specs").unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].text,
        Locale::En.rehydrate_greeting("spec.txt")
    );

    let citation = Citation {
        file_name: "spec.txt".to_string(),
        page: 2,
        quoted_text: "Goodbye.".to_string(),
    };
    assert_eq!(
        restarted.resolve_citation("specs", &citation).unwrap(),
        Resolution::NotFound
    );

    let reply = restarted.send("specs", "still there?").await.unwrap().unwrap();
    assert_eq!(reply.text, "echo: still there?");
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn rehydrate_twice_is_idempotent() {
    let store: Arc<dyn TopicStore> = Arc::new(MemoryTopicStore::default());
    store
        .save(
            "specs",
            "Document start: a.txt\n---\nPage 1:\nx\n---\nDocument end: a.txt",
            &["a.txt".to_string(), "b.txt".to_string()],
        )
        .await
        .unwrap();
    let endpoint = Arc::new(FakeEndpoint::echo());
    let calls = Arc::clone(&endpoint.calls);
    let manager = manager(store, endpoint, ResourcePool::new());

    assert_eq!(manager.rehydrate("specs").await.unwrap(), TopicState::Loaded);
    let first = (
        manager.source_text("specs").unwrap(),
        manager.snapshot("specs").unwrap(),
    );
    assert_eq!(manager.rehydrate("specs").await.unwrap(), TopicState::Loaded);
    let second = (
        manager.source_text("specs").unwrap(),
        manager.snapshot("specs").unwrap(),
    );

    assert_eq!(first, second);
    assert_eq!(
        first.1.display_name.as_deref(),
        Some("2 files uploaded")
    );
    assert_eq!(calls.opened(), 1);
}

#[tokio::test]
async fn rehydrate_all_loads_persisted_topics() {
    let store: Arc<dyn TopicStore> = Arc::new(MemoryTopicStore::default());
    store
        .save("glazing", "Page 1:\nCone 6.", &["kiln.md".to_string()])
        .await
        .unwrap();
    let manager = manager(store, Arc::new(FakeEndpoint::echo()), ResourcePool::new());

    assert_eq!(manager.rehydrate_all().await, 1);
    let states: Vec<_> = manager.topics().into_iter().map(|t| (t.topic_id, t.state)).collect();
    assert_eq!(
        states,
        vec![
            ("specs".to_string(), TopicState::Empty),
            ("glazing".to_string(), TopicState::Loaded),
        ]
    );
    assert_eq!(catalog().len(), manager.topics().len());
}

#[tokio::test]
async fn reset_during_send_discards_the_response() {
    let gate = Arc::new(Gate::default());
    let endpoint = Arc::new(FakeEndpoint::echo().with_gate(Arc::clone(&gate)));
    let calls = Arc::clone(&endpoint.calls);
    let manager = Arc::new(manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        ResourcePool::new(),
    ));
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();

    let sender = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.send("specs", "slow question").await })
    };
    gate.entered.notified().await;

    manager.reset("specs").await.unwrap();
    gate.release.notify_one();

    let outcome = sender.await.unwrap().unwrap();
    assert!(outcome.is_none());
    assert!(manager.messages("specs").unwrap().is_empty());
    assert_eq!(manager.snapshot("specs").unwrap().state, TopicState::Empty);
    assert!(!manager.is_busy("specs").unwrap());
    assert!(eventually(|| calls.closes() == 1).await);
}

#[tokio::test]
async fn replacing_during_send_discards_the_old_response() {
    let gate = Arc::new(Gate::default());
    let endpoint = Arc::new(FakeEndpoint::echo().with_gate(Arc::clone(&gate)));
    let manager = Arc::new(manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        ResourcePool::new(),
    ));
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();

    let sender = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.send("specs", "old question").await })
    };
    gate.entered.notified().await;

    // A reset frees the topic, so a new upload may start while the old turn
    // is still outstanding.
    manager.reset("specs").await.unwrap();
    manager
        .create_or_replace("specs", vec![Upload::new("new.txt", b"fresh".to_vec())])
        .await
        .unwrap();
    gate.release.notify_one();

    assert!(sender.await.unwrap().unwrap().is_none());
    let messages = manager.messages("specs").unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].text.contains("new.txt"));
}

#[tokio::test]
async fn overlapping_calls_on_one_topic_are_busy() {
    let gate = Arc::new(Gate::default());
    let endpoint = Arc::new(FakeEndpoint::echo().with_gate(Arc::clone(&gate)));
    let manager = Arc::new(manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        ResourcePool::new(),
    ));
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    manager
        .create_or_replace("glazing", vec![Upload::new("kiln.md", b"Cone 6.".to_vec())])
        .await
        .unwrap();

    let sender = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.send("specs", "first").await })
    };
    gate.entered.notified().await;

    assert!(manager.is_busy("specs").unwrap());
    assert!(!manager.is_busy("glazing").unwrap());
    assert!(matches!(
        manager.send("specs", "second").await,
        Err(SessionError::Busy(_))
    ));
    assert!(matches!(
        manager.create_or_replace("specs", vec![spec_upload()]).await,
        Err(UploadError::Busy(_))
    ));

    gate.release.notify_one();
    let reply = sender.await.unwrap().unwrap().unwrap();
    assert_eq!(reply.text, "echo: first");
    assert!(!manager.is_busy("specs").unwrap());

    let log = texts(&manager, "specs");
    assert_eq!(log.len(), 3);
    assert_eq!(log[1], (Role::User, "first".to_string()));
}

#[tokio::test]
async fn replacing_documents_releases_previous_resources() {
    let endpoint = Arc::new(FakeEndpoint::echo());
    let calls = Arc::clone(&endpoint.calls);
    let pool = ResourcePool::new();
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        pool.clone(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    manager
        .create_or_replace(
            "specs",
            vec![
                Upload::new("a.txt", b"alpha".to_vec()),
                Upload::new("b.txt", b"beta".to_vec()),
            ],
        )
        .await
        .unwrap();

    assert_eq!(pool.outstanding(), 2);
    assert_eq!(calls.closes(), 1);
    let old = Citation {
        file_name: "spec.txt".to_string(),
        page: 1,
        quoted_text: "Hello world.".to_string(),
    };
    assert_eq!(
        manager.resolve_citation("specs", &old).unwrap(),
        Resolution::NotFound
    );
    assert_eq!(
        manager.snapshot("specs").unwrap().display_name.as_deref(),
        Some("2 files uploaded")
    );
}

#[tokio::test]
async fn shutdown_releases_everything() {
    let endpoint = Arc::new(FakeEndpoint::echo());
    let calls = Arc::clone(&endpoint.calls);
    let pool = ResourcePool::new();
    let manager = manager(
        Arc::new(MemoryTopicStore::default()),
        endpoint,
        pool.clone(),
    );
    manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    manager
        .create_or_replace(
            "glazing",
            vec![
                Upload::new("kiln.md", b"Cone 6.".to_vec()),
                Upload::new("glazes.txt", b"Celadon.".to_vec()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(pool.outstanding(), 3);

    manager.shutdown().await;
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(calls.closes(), 2);
}

#[tokio::test]
async fn quota_failure_does_not_block_upload() {
    let store = Arc::new(MemoryTopicStore::new(16));
    let manager = manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        Arc::new(FakeEndpoint::echo()),
        ResourcePool::new(),
    );

    let snapshot = manager
        .create_or_replace("specs", vec![spec_upload()])
        .await
        .unwrap();
    assert_eq!(snapshot.state, TopicState::Loaded);
    assert!(store.load("specs").await.unwrap().is_none());

    let reply = manager.send("specs", "hi").await.unwrap().unwrap();
    assert_eq!(reply.text, "echo: hi");
}

#[tokio::test]
async fn reset_during_upload_cancels_it_without_persisting() {
    let gate = Arc::new(Gate::default());
    let endpoint = Arc::new(FakeEndpoint::echo().with_open_gate(Arc::clone(&gate)));
    let calls = Arc::clone(&endpoint.calls);
    let store = Arc::new(CountingStore::default());
    let pool = ResourcePool::new();
    let manager = Arc::new(manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        endpoint,
        pool.clone(),
    ));

    let uploader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.create_or_replace("specs", vec![spec_upload()]).await })
    };
    gate.entered.notified().await;

    manager.reset("specs").await.unwrap();
    gate.release.notify_one();

    let outcome = uploader.await.unwrap();
    assert!(matches!(outcome, Err(UploadError::Cancelled(_))));
    assert_eq!(store.saves(), 0);
    assert!(store.load("specs").await.unwrap().is_none());
    assert_eq!(manager.snapshot("specs").unwrap().state, TopicState::Empty);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(calls.closes(), 1);
}

#[tokio::test]
async fn cancelled_upload_leaves_newer_upload_persisted() {
    let gate = Arc::new(Gate::default());
    let endpoint = Arc::new(FakeEndpoint::echo().with_open_gate(Arc::clone(&gate)));
    let store = Arc::new(MemoryTopicStore::default());
    let manager = Arc::new(manager(
        Arc::clone(&store) as Arc<dyn TopicStore>,
        endpoint,
        ResourcePool::new(),
    ));

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .create_or_replace("specs", vec![Upload::new("old.txt", b"Old text.".to_vec())])
                .await
        })
    };
    gate.entered.notified().await;

    manager.reset("specs").await.unwrap();
    manager
        .create_or_replace("specs", vec![Upload::new("new.txt", b"New text.".to_vec())])
        .await
        .unwrap();
    gate.release.notify_one();

    assert!(matches!(
        first.await.unwrap(),
        Err(UploadError::Cancelled(_))
    ));
    let snapshot = manager.snapshot("specs").unwrap();
    assert_eq!(snapshot.state, TopicState::Loaded);
    assert_eq!(snapshot.file_names, vec!["new.txt".to_string()]);

    let stored = store.load("specs").await.unwrap().unwrap();
    assert_eq!(stored.file_names, vec!["new.txt".to_string()]);
    assert!(stored.source_text.contains("New text."));
}
