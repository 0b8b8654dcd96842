//! Citation markers in assistant responses.
//!
//! The grounding instruction asks the model to end factual sentences with
//! `[source: <file>, page: <n>, text: "<quote>"]`. Parsing is purely
//! additive: the response text is kept as-is and the markers found in it are
//! returned alongside, left to right. Anything that does not match the full
//! pattern (missing field, non-numeric or zero page, unterminated quote) is
//! left as plain text.
//!
//! The quote runs up to the first `"` that is followed by the closing `]`,
//! so quoted passages may themselves contain double quotes and brackets. A
//! quote never extends past the start of the next marker.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::locale::{CitationLabels, Locale};
use crate::models::Citation;

static EN_PARSER: Lazy<CitationParser> = Lazy::new(|| CitationParser::new(Locale::En));
static FA_PARSER: Lazy<CitationParser> = Lazy::new(|| CitationParser::new(Locale::Fa));
/// End of a marker: the closing quote and bracket.
static CLOSING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""\s*\]"#).expect("closing pattern is valid"));

/// Response text plus the citations found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub display_text: String,
    pub citations: Vec<Citation>,
}

pub struct CitationParser {
    /// Everything up to and including the opening quote of the text field.
    opening: Regex,
}

impl CitationParser {
    /// Shared parser for a locale's marker labels.
    pub fn for_locale(locale: Locale) -> &'static CitationParser {
        match locale {
            Locale::En => &EN_PARSER,
            Locale::Fa => &FA_PARSER,
        }
    }

    fn new(locale: Locale) -> Self {
        let labels = locale.citation_labels();
        let opening = format!(
            r#"\[\s*{}\s*:\s*(?P<file>[^\]\n]+?)\s*,\s*{}\s*:\s*(?P<page>\d+)\s*,\s*{}\s*:\s*""#,
            regex::escape(labels.source),
            regex::escape(labels.page),
            regex::escape(labels.text),
        );
        // The pattern is assembled from fixed labels, so it always compiles.
        let opening = Regex::new(&opening).expect("citation pattern is valid");
        Self { opening }
    }

    pub fn parse(&self, response_text: &str) -> ParsedResponse {
        let openings: Vec<_> = self.opening.captures_iter(response_text).collect();
        let mut citations = Vec::new();

        for (index, caps) in openings.iter().enumerate() {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let limit = openings
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map_or(response_text.len(), |next| next.start());
            let rest = &response_text[whole.end()..limit];
            let Some(closing) = CLOSING.find(rest) else {
                continue;
            };
            let Some(page) = caps["page"].parse::<u32>().ok().filter(|p| *p > 0) else {
                continue;
            };
            citations.push(Citation {
                file_name: caps["file"].to_string(),
                page,
                quoted_text: rest[..closing.start()].to_string(),
            });
        }

        ParsedResponse {
            display_text: response_text.to_string(),
            citations,
        }
    }
}

/// Renders a citation in the marker format the parser accepts.
pub fn format_citation(labels: CitationLabels, citation: &Citation) -> String {
    format!(
        "[{}: {}, {}: {}, {}: \"{}\"]",
        labels.source,
        citation.file_name,
        labels.page,
        citation.page,
        labels.text,
        citation.quoted_text
    )
}
