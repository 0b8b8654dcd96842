//! Citation → page view resolution and on-page quote location.
//!
//! [`resolve`] turns a citation into a [`ViewRequest`] when the topic still
//! holds the cited file's bytes. [`find_span`] is the search the renderer
//! performs on the page text: whitespace-normalized, case-sensitive. A quote
//! that cannot be located still opens the page, just without a highlight.

use std::collections::HashMap;
use std::ops::Range;

use crate::extract;
use crate::models::{Citation, ViewRequest};
use crate::resources::{ResourceHandle, ResourcePool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    View(ViewRequest),
    /// The cited file is not viewable in this process (never uploaded, or
    /// lost across a restart).
    NotFound,
}

/// Looks the cited file up in a topic's viewable resources.
pub fn resolve(resources: &HashMap<String, ResourceHandle>, citation: &Citation) -> Resolution {
    match resources.get(&citation.file_name) {
        Some(&resource) => Resolution::View(ViewRequest {
            file_name: citation.file_name.clone(),
            page: citation.page,
            highlight_text: citation.quoted_text.clone(),
            resource,
        }),
        None => Resolution::NotFound,
    }
}

/// Text with whitespace runs collapsed to one space, remembering where each
/// byte came from in the original.
struct Collapsed {
    text: String,
    origin: Vec<Range<usize>>,
}

fn collapse(input: &str) -> Collapsed {
    let mut text = String::with_capacity(input.len());
    let mut origin = Vec::with_capacity(input.len());
    let mut run: Option<Range<usize>> = None;

    for (offset, ch) in input.char_indices() {
        let end = offset + ch.len_utf8();
        if ch.is_whitespace() {
            run = Some(match run {
                Some(r) => r.start..end,
                None => offset..end,
            });
            continue;
        }
        if let Some(r) = run.take() {
            text.push(' ');
            origin.push(r);
        }
        text.push(ch);
        for _ in 0..ch.len_utf8() {
            origin.push(offset..end);
        }
    }
    if let Some(r) = run {
        text.push(' ');
        origin.push(r);
    }

    Collapsed { text, origin }
}

/// Byte range of `quote` inside `page_text`, if present.
///
/// Any run of whitespace in either string matches any other run, so line
/// wraps and double spaces introduced by extraction do not break the match.
/// Leading and trailing whitespace of the quote is ignored. Matching is
/// case-sensitive.
pub fn find_span(page_text: &str, quote: &str) -> Option<Range<usize>> {
    let needle = collapse(quote.trim()).text;
    if needle.is_empty() {
        return None;
    }
    let haystack = collapse(page_text);
    let start = haystack.text.find(&needle)?;
    let end = start + needle.len();
    Some(haystack.origin[start].start..haystack.origin[end - 1].end)
}

/// A page ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub file_name: String,
    pub page: u32,
    pub text: String,
    /// Byte range of the highlighted quote in `text`.
    pub highlight: Option<Range<usize>>,
}

impl RenderedPage {
    /// Page text with the highlight wrapped in `open`/`close`.
    pub fn marked(&self, open: &str, close: &str) -> String {
        match &self.highlight {
            Some(span) => format!(
                "{}{open}{}{close}{}",
                &self.text[..span.start],
                &self.text[span.clone()],
                &self.text[span.end..]
            ),
            None => self.text.clone(),
        }
    }
}

/// Opens the page a [`ViewRequest`] points at.
///
/// Implementations never fail back into the caller: an unloadable page is
/// `None`, an unlocatable quote is a page without a highlight.
pub trait PageRenderer: Send + Sync {
    fn render(&self, request: &ViewRequest) -> Option<RenderedPage>;
}

/// Renders pages as plain text by re-extracting them from the pooled bytes.
pub struct TextPageRenderer {
    pool: ResourcePool,
}

impl TextPageRenderer {
    pub fn new(pool: ResourcePool) -> Self {
        Self { pool }
    }
}

impl PageRenderer for TextPageRenderer {
    fn render(&self, request: &ViewRequest) -> Option<RenderedPage> {
        let Some(bytes) = self.pool.bytes(request.resource) else {
            tracing::warn!(resource = %request.resource, "resource released before rendering");
            return None;
        };

        let text = match extract::extract_page(&bytes, &request.file_name, request.page) {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!(
                    file_name = %request.file_name,
                    page = request.page,
                    "cited page does not exist"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(file_name = %request.file_name, error = %e, "failed to re-extract page");
                return None;
            }
        };

        let highlight = find_span(&text, &request.highlight_text);
        if highlight.is_none() {
            tracing::debug!(
                file_name = %request.file_name,
                page = request.page,
                "quote not found on page; showing it unhighlighted"
            );
        }

        Some(RenderedPage {
            file_name: request.file_name.clone(),
            page: request.page,
            text,
            highlight,
        })
    }
}
