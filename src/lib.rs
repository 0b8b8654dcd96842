//! # Topic Chat
//!
//! Document-grounded topic conversations with page-level citations.
//!
//! Documents uploaded into a named topic are split into pages, concatenated
//! with inline page headers and handed to a conversational endpoint as the
//! session's only knowledge. Answers carry citation markers of the form
//! `[source: <file>, page: <n>, text: "<quote>"]`, which are parsed back into
//! structured citations and resolved to a page view with the quote
//! highlighted.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Uploads  │──▶│  Extract    │──▶│ Instruction  │
//! │ PDF/PPTX  │   │ pages       │   │ + source txt │
//! └───────────┘   └─────────────┘   └──────┬───────┘
//!                                          ▼
//!   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//!   │  SQLite  │◀──│   Session    │──▶│   LLM    │
//!   │  store   │   │   manager    │   │ endpoint │
//!   └──────────┘   └──────┬───────┘   └──────────┘
//!                         ▼
//!                 ┌──────────────┐   ┌───────────┐
//!                 │  Citations   │──▶│ Highlight │
//!                 └──────────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Page text extraction (PDF, PPTX, plain text) |
//! | [`topic_store`] | Durable per-topic source text and file names |
//! | [`instruction`] | Source text concatenation and grounding instruction |
//! | [`llm`] | Conversational endpoint abstraction (Gemini, Ollama) |
//! | [`session`] | Per-topic session lifecycle and message log |
//! | [`citation`] | Citation marker parsing |
//! | [`highlight`] | Citation resolution and on-page quote search |
//! | [`resources`] | In-memory document bytes for page views |
//! | [`locale`] | Localized labels and canned messages |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod citation;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod highlight;
pub mod instruction;
pub mod llm;
pub mod locale;
pub mod migrate;
pub mod models;
pub mod resources;
pub mod session;
pub mod topic_store;
