//! Response parsing: model JSON → [`StructuredPage`]s with stable word ids.
//!
//! Rules, applied in order:
//! 1. Strip an outer Markdown code fence if the model added one anyway
//! 2. Decode the contract shape; blank or non-conforming input is a fatal
//!    [`ParseError`]
//! 3. Drop pages marked `keepPage: false`
//! 4. Index blocks per page from zero
//! 5. Verse blocks containing the hemistich delimiter split at its first
//!    occurrence into `sadr` / `ajz`; every other block becomes `words`
//! 6. Tokenise on whitespace, discarding empty tokens
//!
//! Page numbers are returned exactly as the model reported them, i.e. local
//! to the chunk. Remapping to absolute numbers is the orchestrator's job.
//!
//! Output that stopped at the token ceiling is usually cut off mid-string.
//! [`parse_truncated`] keeps the page objects that were closed before the
//! cut and drops the rest.

use crate::error::ParseError;
use crate::output::{tokenize, BlockContent, StructuredBlock, StructuredPage, WordKind};
use crate::schema::{BlockType, HEMISTICH_DELIMITER};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RawResponse {
    pages: Vec<RawPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
    page_number: u32,
    keep_page: bool,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    block_type: BlockType,
    #[serde(default)]
    block_text: String,
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n```$").unwrap());

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```(?:json|JSON)?\s*\n").unwrap());

fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Parse the model's JSON payload into pages.
pub fn parse(raw_json: &str) -> Result<Vec<StructuredPage>, ParseError> {
    let body = strip_code_fences(raw_json);
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    let raw: RawResponse = serde_json::from_str(body)?;
    let reported = raw.pages.len();

    let pages: Vec<StructuredPage> = raw
        .pages
        .into_iter()
        .filter(|p| p.keep_page)
        .map(normalize_page)
        .collect();

    debug!(
        "Parsed {} pages ({} dropped as non-content)",
        pages.len(),
        reported - pages.len()
    );
    Ok(pages)
}

/// Parse output that was cut off, keeping every fully closed page object.
///
/// Complete pages must still match the contract; only the unterminated tail
/// is discarded.
pub fn parse_truncated(raw_json: &str) -> Result<Vec<StructuredPage>, ParseError> {
    let trimmed = raw_json.trim();
    let body = match RE_OPENING_FENCE.find(trimmed) {
        Some(fence) => &trimmed[fence.end()..],
        None => trimmed,
    };
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    let objects = complete_page_objects(body);
    let mut pages = Vec::with_capacity(objects.len());
    for object in &objects {
        let page: RawPage = serde_json::from_str(object)?;
        if page.keep_page {
            pages.push(normalize_page(page));
        }
    }

    warn!(
        "Salvaged {} closed page objects from cut-off output ({} kept); dropped the unterminated tail",
        objects.len(),
        pages.len()
    );
    Ok(pages)
}

/// Slices of the `pages` array elements whose closing brace was reached.
fn complete_page_objects(body: &str) -> Vec<&str> {
    let Some(key) = body.find("\"pages\"") else {
        return Vec::new();
    };
    let after_key = &body[key + "\"pages\"".len()..];
    let Some(open) = after_key.find('[') else {
        return Vec::new();
    };
    let array = &after_key[open + 1..];

    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in array.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                if depth == 0 && c == '{' {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' => {
                // `]` at depth 0 closes the pages array itself.
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&array[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn normalize_page(page: RawPage) -> StructuredPage {
    let page_number = page.page_number;
    let content = page
        .blocks
        .into_iter()
        .enumerate()
        .map(|(block_index, block)| normalize_block(block, page_number, block_index))
        .collect();
    StructuredPage {
        page_number,
        content,
    }
}

fn normalize_block(block: RawBlock, page_number: u32, block_index: usize) -> StructuredBlock {
    let content = match split_hemistichs(block.block_type, &block.block_text) {
        Some((first, second)) => BlockContent::Verse {
            sadr: tokenize(first, page_number, block_index, WordKind::Sadr),
            ajz: tokenize(second, page_number, block_index, WordKind::Ajz),
        },
        None => BlockContent::Words {
            words: tokenize(&block.block_text, page_number, block_index, WordKind::Word),
        },
    };
    StructuredBlock {
        block_type: block.block_type,
        content,
    }
}

/// Split a verse line at the first delimiter. Later delimiters stay in the second half.
fn split_hemistichs(block_type: BlockType, text: &str) -> Option<(&str, &str)> {
    if !block_type.is_verse() {
        return None;
    }
    text.split_once(HEMISTICH_DELIMITER)
        .map(|(first, second)| (first.trim(), second.trim()))
}
