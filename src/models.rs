//! Core data types shared by the extraction, session and citation modules.

use chrono::{DateTime, Utc};

use crate::resources::ResourceHandle;

/// Text of one physical page, exactly as extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
}

/// An uploaded document split into pages.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub pages: Vec<PageText>,
}

/// Raw bytes of one file handed to an upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A model-emitted reference to a quoted passage on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub file_name: String,
    pub page: u32,
    pub quoted_text: String,
}

/// One entry of a topic's conversation log.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Parsed from `text`; always empty for user messages.
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            citations,
            created_at: Utc::now(),
        }
    }
}

/// What the page renderer needs to open a page and highlight a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRequest {
    pub file_name: String,
    pub page: u32,
    pub highlight_text: String,
    pub resource: ResourceHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    Empty,
    Loaded,
}
