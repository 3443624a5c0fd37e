//! Page merging with overwrite-by-page-number semantics.
//!
//! `merge(existing, incoming)` never mutates its inputs. Every incoming page
//! replaces any existing page with the same number, and the result is
//! sorted ascending and unique by page number. Replaying a chunk therefore
//! leaves the document unchanged: `merge(merge(d, c), c) == merge(d, c)`.

use crate::output::StructuredPage;
use std::collections::BTreeMap;

/// Combine `existing` and `incoming` into a new, ordered page list.
///
/// Within `incoming`, a later page wins over an earlier one with the same number.
pub fn merge(existing: &[StructuredPage], incoming: &[StructuredPage]) -> Vec<StructuredPage> {
    let mut by_number: BTreeMap<u32, &StructuredPage> = BTreeMap::new();
    for page in existing.iter().chain(incoming) {
        by_number.insert(page.page_number, page);
    }
    by_number.into_values().cloned().collect()
}
