//! Grounding instruction and source text for a topic's session.
//!
//! There is no retrieval step: the whole document set is embedded in the
//! session instruction. Page headers are written inline so the model can
//! cite page numbers, and the page text itself is copied byte for byte.

use crate::locale::Locale;
use crate::models::Document;

const SECTION_RULE: &str = "---";

/// Concatenates documents with document and page delimiters.
pub fn build_source_text(locale: Locale, documents: &[Document]) -> String {
    documents
        .iter()
        .map(|doc| {
            let pages = doc
                .pages
                .iter()
                .map(|page| format!("{}\n{}", locale.page_header(page.page_number), page.text))
                .collect::<Vec<_>>()
                .join(&format!("\n{SECTION_RULE}\n"));
            format!(
                "{}\n{SECTION_RULE}\n{}\n{SECTION_RULE}\n{}",
                locale.document_start(&doc.file_name),
                pages,
                locale.document_end(&doc.file_name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds the instruction a session is opened with.
pub fn build_instruction(
    locale: Locale,
    topic_label: &str,
    file_names: &[String],
    source_text: &str,
) -> String {
    let labels = locale.citation_labels();
    let marker = format!(
        "[{}: {}, {}: {}, {}: \"{}\"]",
        labels.source,
        placeholder(locale, Placeholder::FileName),
        labels.page,
        placeholder(locale, Placeholder::Page),
        labels.text,
        placeholder(locale, Placeholder::Quote)
    );
    let files = file_names.join(", ");

    match locale {
        Locale::En => format!(
            r#"You are an expert, instructive assistant for the topic "{topic_label}". Answer questions only and exclusively from the content of the supplied documents.
**Answering guidelines:**
1.  **Complete and thorough:** Give complete, precise and detailed answers. Explain concepts in simple language, as if teaching a beginner.
2.  **Exact citations:** Whenever you use information from a document you **must** end the sentence with its source in exactly this format: {marker}. The quote must be the exact text from the document that you relied on, copied verbatim, so it can be highlighted in the document.
3.  **Honesty:** If the answer is not in the documents, say clearly that the information was not found in the documents.
4.  **Structured:** Where possible use numbered or bulleted lists to organize answers.

The user has uploaded the following files: {files}.
Document text:
{SECTION_RULE}
{source_text}
{SECTION_RULE}
"#
        ),
        Locale::Fa => format!(
            r#"شما یک دستیار هوش مصنوعی متخصص و آموزنده برای موضوع "{topic_label}" هستید. وظیفه شما این است که به سوالات، فقط و فقط بر اساس محتوای اسناد ارائه شده پاسخ دهید.
**دستورالعمل‌های پاسخگویی:**
1.  **کامل و جامع:** پاسخ‌های خود را به صورت کامل، دقیق و با جزئیات فراوان ارائه دهید. مفاهیم را به زبانی ساده و قابل فهم توضیح دهید، گویی در حال آموزش به یک فرد مبتدی هستید.
2.  **ارجاع دقیق:** هنگامی که از اطلاعات یک سند استفاده می‌کنید، **باید** در انتهای جمله مربوطه، منبع را با فرمت دقیق زیر ذکر کنید: {marker}. نقل قول باید دقیقاً همان متنی باشد که از سند برای پاسخگویی استفاده کرده‌اید و به شما امکان می‌دهد تا متن مورد نظر را در سند هایلایت کنید.
3.  **صداقت:** اگر پاسخ سوالی در اسناد موجود نیست، به وضوح بگویید که اطلاعات مورد نظر در اسناد یافت نشد.
4.  **ساختارمند:** در صورت امکان، از لیست‌های شماره‌دار یا بولت‌پوینت برای سازماندهی بهتر پاسخ‌ها و افزایش خوانایی استفاده کنید.

کاربر فایل‌های زیر را آپلود کرده است: {files}.
متن اسناد:
{SECTION_RULE}
{source_text}
{SECTION_RULE}
"#
        ),
    }
}

enum Placeholder {
    FileName,
    Page,
    Quote,
}

fn placeholder(locale: Locale, which: Placeholder) -> &'static str {
    match (locale, which) {
        (Locale::En, Placeholder::FileName) => "<fileName>",
        (Locale::En, Placeholder::Page) => "<pageNumber>",
        (Locale::En, Placeholder::Quote) => "<verbatim quote>",
        (Locale::Fa, Placeholder::FileName) => "نام فایل",
        (Locale::Fa, Placeholder::Page) => "شماره صفحه",
        (Locale::Fa, Placeholder::Quote) => "نقل قول دقیق از متن",
    }
}
