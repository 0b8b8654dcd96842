//! User-facing wording for instructions, delimiters and canned messages.
//!
//! The citation marker labels live here too: the instruction tells the model
//! to emit them and the parser looks for them, so both must read from the
//! same table.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Fa,
}

/// Field labels inside a citation marker, e.g. `[source: a.pdf, page: 2, text: "..."]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CitationLabels {
    pub source: &'static str,
    pub page: &'static str,
    pub text: &'static str,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en" => Some(Locale::En),
            "fa" => Some(Locale::Fa),
            _ => None,
        }
    }

    pub fn citation_labels(self) -> CitationLabels {
        match self {
            Locale::En => CitationLabels {
                source: "source",
                page: "page",
                text: "text",
            },
            Locale::Fa => CitationLabels {
                source: "منبع",
                page: "صفحه",
                text: "متن",
            },
        }
    }

    pub fn document_start(self, file_name: &str) -> String {
        match self {
            Locale::En => format!("Document start: {file_name}"),
            Locale::Fa => format!("شروع سند: {file_name}"),
        }
    }

    pub fn document_end(self, file_name: &str) -> String {
        match self {
            Locale::En => format!("Document end: {file_name}"),
            Locale::Fa => format!("پایان سند: {file_name}"),
        }
    }

    pub fn page_header(self, page_number: u32) -> String {
        match self {
            Locale::En => format!("Page {page_number}:"),
            Locale::Fa => format!("صفحه {page_number}:"),
        }
    }

    /// Label shown for a topic's document set.
    pub fn display_file_name(self, file_names: &[String]) -> String {
        match file_names {
            [single] => single.clone(),
            many => match self {
                Locale::En => format!("{} files uploaded", many.len()),
                Locale::Fa => format!("{} فایل آپلود شد", many.len()),
            },
        }
    }

    /// Seed message after an upload; lists the files that were read.
    pub fn upload_greeting(self, file_names: &[String], topic_label: &str) -> String {
        let count = file_names.len();
        let listed = file_names.join(", ");
        match self {
            Locale::En => format!(
                "I have read {count} document(s) ({listed}). Ask me anything about {topic_label}."
            ),
            Locale::Fa => format!(
                "من {count} سند را خواندم ({listed}). هر سوالی در مورد {topic_label} دارید بپرسید."
            ),
        }
    }

    pub fn rehydrate_greeting(self, display_name: &str) -> String {
        match self {
            Locale::En => {
                format!("Ready to answer questions about \"{display_name}\". How can I help you?")
            }
            Locale::Fa => format!(
                "آماده پاسخگویی به سوالات در مورد \"{display_name}\" هستم. چگونه می‌توانم به شما کمک کنم؟"
            ),
        }
    }

    pub fn send_failure(self) -> &'static str {
        match self {
            Locale::En => "Sorry, I ran into an error. Please try again.",
            Locale::Fa => "متاسفم، با خطا مواجه شدم. لطفاً دوباره تلاش کنید.",
        }
    }
}
