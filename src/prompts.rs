//! Prompt for the chunk-enrichment request.
//!
//! Keeping the prompt here, away from retry and parsing code, means prompt
//! changes touch one file and unit tests can inspect the rendered text
//! without a live model.
//!
//! The prompt and [`crate::schema::response_schema`] form one contract: the
//! prompt explains *what* each field means, the schema pins *how* it is
//! shaped.

use crate::schema::{BlockType, HEMISTICH_DELIMITER};
use serde::{Deserialize, Serialize};

/// Placeholder used for any book-context field the caller did not supply.
pub const UNKNOWN: &str = "unknown";

/// Optional bibliographic hints that help the model disambiguate vocalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookContext {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

impl BookContext {
    fn field(value: &Option<String>) -> &str {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN)
    }
}

const PROMPT_TEMPLATE: &str = r#"You are an expert in Classical Arabic typography and philology. The attached PDF is a window of consecutive pages from a scanned book.

BOOK CONTEXT
- Title: {title}
- Author: {author}
- Genre: {genre}
- Description: {description}

Produce a JSON object that follows the response schema exactly.

1. PAGES
   - Emit one entry per page of the attached PDF, in order.
   - pageNumber is the 1-based position of the page inside the attached PDF, NOT the number printed on the page.
   - Set keepPage to false for covers, blank pages and purely decorative pages; give them an empty blocks list.

2. TEXT
   - Transcribe every word exactly as printed and add full diacritical marking (tashkeel) to EVERY word.
   - Preserve the natural reading order of the page (right to left, top to bottom, column by column).
   - Do not translate, summarise, correct or add commentary.

3. BLOCKS
   - Split each page into semantic blocks and classify each one with exactly one blockType:
     {block_types}
   - Running headers and footers are header/footer; printed page numbers are page_number.

4. VERSE
   - Poetry lines are verse_primary; verse quoted inside prose is verse_citation; verse inside footnotes is verse_footnote.
   - Emit one block per verse line and separate its two hemistichs (sadr and ajz) with the delimiter {delimiter} and nothing else.
   - Never use {delimiter} anywhere except between the two hemistichs of a verse line.

5. OUTPUT
   - Output ONLY the JSON object. No Markdown fences, no explanations."#;

/// Render the chunk prompt, interpolating `context`.
///
/// Missing context fields render as [`UNKNOWN`]; construction never fails.
pub fn build_prompt(context: &BookContext) -> String {
    let block_types = BlockType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    PROMPT_TEMPLATE
        .replace("{title}", BookContext::field(&context.title))
        .replace("{author}", BookContext::field(&context.author))
        .replace("{genre}", BookContext::field(&context.genre))
        .replace("{description}", BookContext::field(&context.description))
        .replace("{block_types}", &block_types)
        .replace("{delimiter}", HEMISTICH_DELIMITER)
}
