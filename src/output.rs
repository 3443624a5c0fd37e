//! The structured document model: page → semantic blocks → words.
//!
//! These types are both the in-memory result of a job and the persisted
//! JSON format (`camelCase` keys). A block holds either a flat `words` list
//! or, for verse content, the two hemistich lists `sadr` and `ajz`.

use crate::schema::BlockType;
use serde::{Deserialize, Serialize};

/// One source page after enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPage {
    /// 1-based page number, absolute within the source document.
    pub page_number: u32,
    /// Blocks in reading order.
    pub content: Vec<StructuredBlock>,
}

/// One semantic block of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredBlock {
    pub block_type: BlockType,
    #[serde(flatten)]
    pub content: BlockContent,
}

/// Exactly one of the two layouts is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockContent {
    /// A verse line split at the hemistich delimiter.
    Verse { sadr: Vec<Word>, ajz: Vec<Word> },
    /// Everything else, verse lines without a delimiter included.
    Words { words: Vec<Word> },
}

/// A single whitespace-delimited token with a reproducible id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: String,
    pub text: String,
}

/// Which word list a word belongs to; the suffix letter inside its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    /// Plain block word, `w`.
    Word,
    /// First hemistich, `s`.
    Sadr,
    /// Second hemistich, `a`.
    Ajz,
}

impl WordKind {
    pub fn suffix(self) -> char {
        match self {
            WordKind::Word => 'w',
            WordKind::Sadr => 's',
            WordKind::Ajz => 'a',
        }
    }
}

/// `p<page>b<block><suffix><index>`, e.g. `p1b0w2`.
///
/// The id is an opaque composite key. Nothing in the crate parses it back.
pub fn word_id(page_number: u32, block_index: usize, kind: WordKind, word_index: usize) -> String {
    format!(
        "p{}b{}{}{}",
        page_number,
        block_index,
        kind.suffix(),
        word_index
    )
}

/// Split `text` on whitespace into words of the given kind.
pub(crate) fn tokenize(text: &str, page_number: u32, block_index: usize, kind: WordKind) -> Vec<Word> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, token)| Word {
            id: word_id(page_number, block_index, kind, i),
            text: token.to_string(),
        })
        .collect()
}

impl BlockContent {
    /// Total number of words across all lists.
    pub fn word_count(&self) -> usize {
        match self {
            BlockContent::Verse { sadr, ajz } => sadr.len() + ajz.len(),
            BlockContent::Words { words } => words.len(),
        }
    }

    fn reassign_ids(&mut self, page_number: u32, block_index: usize) {
        let relabel = |words: &mut Vec<Word>, kind: WordKind| {
            for (i, w) in words.iter_mut().enumerate() {
                w.id = word_id(page_number, block_index, kind, i);
            }
        };
        match self {
            BlockContent::Verse { sadr, ajz } => {
                relabel(sadr, WordKind::Sadr);
                relabel(ajz, WordKind::Ajz);
            }
            BlockContent::Words { words } => relabel(words, WordKind::Word),
        }
    }
}

impl StructuredPage {
    /// Move the page to `page_number`, re-deriving every word id from it.
    pub fn renumber(&mut self, page_number: u32) {
        self.page_number = page_number;
        for (block_index, block) in self.content.iter_mut().enumerate() {
            block.content.reassign_ids(page_number, block_index);
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.iter().map(|b| b.content.word_count()).sum()
    }
}

/// Return value of one [`crate::enrich::Enricher::enrich`] invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub book_id: String,
    /// Every page of the document: resumed pages plus the ones produced now,
    /// unique by page number and sorted ascending.
    pub pages: Vec<StructuredPage>,
    /// Wall time of this invocation.
    pub duration_ms: u64,
    /// Tokens reported by the endpoint for the chunks processed in this invocation.
    pub total_tokens: u64,
    /// At least one chunk hit the output-token ceiling.
    pub was_truncated: bool,
    /// Zero-based indices of the truncated chunks.
    #[serde(default)]
    pub truncated_chunks: Vec<usize>,
    /// Chunks sent to the model in this invocation.
    #[serde(default)]
    pub chunks_processed: usize,
    /// Chunks taken from the stored result because of the resume cursor.
    #[serde(default)]
    pub chunks_skipped: usize,
    /// Page count of the source PDF.
    #[serde(default)]
    pub total_source_pages: usize,
}
