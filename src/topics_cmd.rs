use anyhow::{bail, Result};

use topic_chat::config::Config;
use topic_chat::topic_store::TopicStore;

use crate::open_store;

pub async fn list_topics(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    let locale = cfg.prompt.locale();

    println!("{:<16} {:<28} {:<8} DOCUMENTS", "TOPIC", "LABEL", "STORED");
    for topic in &cfg.topics {
        let (stored, documents) = match store.load(&topic.id).await {
            Ok(Some(stored)) => ("yes", locale.display_file_name(&stored.file_names)),
            Ok(None) => ("no", "-".to_string()),
            Err(e) => {
                tracing::warn!(topic = %topic.id, error = %e, "failed to read persisted topic");
                ("error", "-".to_string())
            }
        };
        println!("{:<16} {:<28} {:<8} {}", topic.id, topic.label, stored, documents);
    }

    Ok(())
}

pub async fn reset_topic(cfg: &Config, topic_id: &str) -> Result<()> {
    if cfg.topic(topic_id).is_none() {
        bail!("unknown topic '{}'", topic_id);
    }
    let store = open_store(cfg).await?;
    store.clear(topic_id).await?;
    println!("Cleared persisted documents for topic '{}'.", topic_id);
    Ok(())
}
