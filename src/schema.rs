//! Structured-output contract: the response shape the model must return.
//!
//! The schema is sent as `generationConfig.responseSchema` together with
//! `responseMimeType: application/json`, so the endpoint constrains decoding
//! to it. [`crate::pipeline::parse`] decodes exactly this shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Prefix shared by every verse block type.
pub const VERSE_PREFIX: &str = "verse_";

/// Separates the two hemistichs of a verse line inside `blockText`.
pub const HEMISTICH_DELIMITER: &str = "|||";

/// Semantic role of a block. Closed set; the schema enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Paragraph,
    Title,
    Subtitle,
    Header,
    Footer,
    Quote,
    ListItem,
    PageNumber,
    Caption,
    VersePrimary,
    VerseCitation,
    VerseFootnote,
}

impl BlockType {
    pub const ALL: [BlockType; 12] = [
        BlockType::Paragraph,
        BlockType::Title,
        BlockType::Subtitle,
        BlockType::Header,
        BlockType::Footer,
        BlockType::Quote,
        BlockType::ListItem,
        BlockType::PageNumber,
        BlockType::Caption,
        BlockType::VersePrimary,
        BlockType::VerseCitation,
        BlockType::VerseFootnote,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::Title => "title",
            BlockType::Subtitle => "subtitle",
            BlockType::Header => "header",
            BlockType::Footer => "footer",
            BlockType::Quote => "quote",
            BlockType::ListItem => "list_item",
            BlockType::PageNumber => "page_number",
            BlockType::Caption => "caption",
            BlockType::VersePrimary => "verse_primary",
            BlockType::VerseCitation => "verse_citation",
            BlockType::VerseFootnote => "verse_footnote",
        }
    }

    pub fn is_verse(self) -> bool {
        self.as_str().starts_with(VERSE_PREFIX)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `responseSchema` object for the generateContent request.
///
/// ```text
/// { pages: [ { pageNumber: int, keepPage: bool,
///              blocks: [ { blockType: enum, blockText: string } ] } ] }
/// ```
pub fn response_schema() -> Value {
    let block_types: Vec<&str> = BlockType::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "pages": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "pageNumber": {
                            "type": "INTEGER",
                            "description": "1-based position of the page inside the supplied document"
                        },
                        "keepPage": {
                            "type": "BOOLEAN",
                            "description": "false for cover, blank or purely decorative pages"
                        },
                        "blocks": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "blockType": {
                                        "type": "STRING",
                                        "enum": block_types
                                    },
                                    "blockText": { "type": "STRING" }
                                },
                                "required": ["blockType", "blockText"],
                                "propertyOrdering": ["blockType", "blockText"]
                            }
                        }
                    },
                    "required": ["pageNumber", "keepPage", "blocks"],
                    "propertyOrdering": ["pageNumber", "keepPage", "blocks"]
                }
            }
        },
        "required": ["pages"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_as_str() {
        for t in BlockType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, t.as_str());
        }
    }

    #[test]
    fn verse_types() {
        let verses: Vec<_> = BlockType::ALL.iter().filter(|t| t.is_verse()).collect();
        assert_eq!(
            verses,
            vec![
                &BlockType::VersePrimary,
                &BlockType::VerseCitation,
                &BlockType::VerseFootnote
            ]
        );
    }

    #[test]
    fn schema_enumerates_every_block_type() {
        let schema = response_schema();
        let allowed = &schema["properties"]["pages"]["items"]["properties"]["blocks"]["items"]
            ["properties"]["blockType"]["enum"];
        assert_eq!(allowed.as_array().unwrap().len(), BlockType::ALL.len());
        assert!(allowed.as_array().unwrap().iter().any(|v| v == "list_item"));
    }

    #[test]
    fn schema_requires_page_fields() {
        let schema = response_schema();
        let required = &schema["properties"]["pages"]["items"]["required"];
        for field in ["pageNumber", "keepPage", "blocks"] {
            assert!(required.as_array().unwrap().iter().any(|v| v == field));
        }
    }
}
