//! Interactive conversation loop for one topic.
//!
//! Plain lines are sent to the topic's session. Lines starting with `/` are
//! commands:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/upload FILE...` | replace the topic's documents |
//! | `/view N` | open the page of the N-th citation of the last answer |
//! | `/history` | print the whole conversation |
//! | `/reset` | forget the topic's documents and conversation |
//! | `/quit` | leave (end of input works too) |

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use topic_chat::citation::format_citation;
use topic_chat::config::{Config, TopicConfig};
use topic_chat::highlight::{PageRenderer, Resolution, TextPageRenderer};
use topic_chat::llm;
use topic_chat::models::{Citation, Message, Role, TopicState, Upload};
use topic_chat::resources::ResourcePool;
use topic_chat::session::SessionManager;

use crate::open_store;

const HIGHLIGHT_START: &str = "\x1b[7m";
const HIGHLIGHT_END: &str = "\x1b[0m";

pub async fn run_chat(cfg: &Config, topic_id: &str, upload_paths: &[PathBuf]) -> Result<()> {
    let topic = cfg
        .topic(topic_id)
        .ok_or_else(|| anyhow!("unknown topic '{}'", topic_id))?;

    let endpoint = llm::create_endpoint(&cfg.llm)?;
    let store = open_store(cfg).await?;
    let pool = ResourcePool::new();
    let manager = SessionManager::new(
        &cfg.topics,
        cfg.prompt.locale(),
        Arc::new(store),
        endpoint,
        pool.clone(),
    );
    let renderer = TextPageRenderer::new(pool);

    let result = converse(&manager, &renderer, topic, upload_paths).await;
    manager.shutdown().await;
    result
}

async fn converse(
    manager: &SessionManager,
    renderer: &TextPageRenderer,
    topic: &TopicConfig,
    upload_paths: &[PathBuf],
) -> Result<()> {
    let topic_id = topic.id.as_str();
    if manager.rehydrate(topic_id).await? == TopicState::Loaded {
        tracing::info!(topic = topic_id, "restored persisted documents");
    }
    if !upload_paths.is_empty() {
        upload(manager, topic_id, upload_paths).await;
    }

    println!("Topic: {} ({})", topic.label, topic.id);
    for message in manager.messages(topic_id)? {
        print_message(manager, &message);
    }
    if manager.snapshot(topic_id)?.state == TopicState::Empty {
        println!("No documents yet. Use /upload FILE... to add some.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/history", _) => {
                for message in manager.messages(topic_id)? {
                    print_message(manager, &message);
                }
            }
            ("/reset", _) => {
                manager.reset(topic_id).await?;
                println!("Topic reset. Upload documents to start again.");
            }
            ("/upload", args) => {
                let paths: Vec<PathBuf> = args.split_whitespace().map(PathBuf::from).collect();
                if paths.is_empty() {
                    println!("Usage: /upload FILE...");
                } else {
                    upload(manager, topic_id, &paths).await;
                    if let Some(greeting) = manager.messages(topic_id)?.last() {
                        print_message(manager, greeting);
                    }
                }
            }
            ("/view", arg) => view(manager, renderer, topic_id, arg)?,
            (command, _) if command.starts_with('/') => {
                println!("Unknown command {command}. Try /upload, /view, /history, /reset or /quit.");
            }
            _ => match manager.send(topic_id, line).await? {
                Some(reply) => print_message(manager, &reply),
                None if manager.snapshot(topic_id)?.state == TopicState::Empty => {
                    println!("No documents loaded. Use /upload FILE... first.");
                }
                None => {}
            },
        }
    }

    Ok(())
}

async fn upload(manager: &SessionManager, topic_id: &str, paths: &[PathBuf]) {
    let uploads = match read_uploads(paths).await {
        Ok(uploads) => uploads,
        Err(e) => {
            println!("Upload failed: {e:#}");
            return;
        }
    };
    match manager.create_or_replace(topic_id, uploads).await {
        Ok(snapshot) => {
            tracing::info!(topic = topic_id, files = ?snapshot.file_names, "upload complete");
        }
        Err(e) => println!("Upload failed: {e}"),
    }
}

async fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(Upload::new(file_name(path), bytes));
    }
    Ok(uploads)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_message(manager: &SessionManager, message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("\n[{speaker}] {}", message.text);
    let labels = manager.locale().citation_labels();
    for (index, citation) in message.citations.iter().enumerate() {
        println!("  ({}) {}", index + 1, format_citation(labels, citation));
    }
    println!();
}

/// The `index`-th (1-based) citation of the most recent assistant message.
fn last_answer_citation(messages: &[Message], index: usize) -> Option<&Citation> {
    let last_answer = messages.iter().rev().find(|m| m.role == Role::Assistant)?;
    last_answer.citations.get(index.checked_sub(1)?)
}

fn view(
    manager: &SessionManager,
    renderer: &TextPageRenderer,
    topic_id: &str,
    arg: &str,
) -> Result<()> {
    let Ok(index) = arg.trim().parse::<usize>() else {
        println!("Usage: /view N");
        return Ok(());
    };

    let messages = manager.messages(topic_id)?;
    let Some(citation) = last_answer_citation(&messages, index) else {
        println!("No citation {index} in the last answer.");
        return Ok(());
    };

    match manager.resolve_citation(topic_id, citation)? {
        Resolution::View(request) => match renderer.render(&request) {
            Some(page) => {
                println!("--- {} / page {} ---", page.file_name, page.page);
                println!("{}", page.marked(HIGHLIGHT_START, HIGHLIGHT_END));
                if page.highlight.is_none() {
                    println!("(quoted text not found on this page)");
                }
                println!("---");
            }
            None => println!("Page {} of {} could not be opened.", request.page, request.file_name),
        },
        Resolution::NotFound => {
            println!(
                "Source not currently viewable: upload {} again to open it.",
                citation.file_name
            );
        }
    }
    Ok(())
}
