//! Outfit archetype classification.
//!
//! Item names do not carry their archetype, so it is guessed from keywords.
//! This is a best-effort heuristic, not an authoritative mapping: it sits
//! behind the `OutfitClassifier` trait so a lookup table (or anything more
//! accurate) can replace it without touching the valuation code.

use crate::types::Archetype;

/// Maps an item name to the archetype used for valuation.
pub trait OutfitClassifier: Send + Sync {
    fn classify(&self, item_name: &str) -> Archetype;
}

/// Keyword matcher. Checked in order: mount, simple, classic, premium.
/// Anything unmatched is `Premium`, the highest-yield archetype.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

const MOUNT_WORDS: &[&str] = &["horse", "mount", "gear", "saddle", "stirrup"];
const SIMPLE_WORDS: &[&str] = &["simple"];
const CLASSIC_WORDS: &[&str] = &["classic", "original"];

impl OutfitClassifier for KeywordClassifier {
    fn classify(&self, item_name: &str) -> Archetype {
        classify_outfit_type(item_name)
    }
}

/// Keyword heuristic used by `KeywordClassifier`.
pub fn classify_outfit_type(item_name: &str) -> Archetype {
    let name = item_name.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| name.contains(w));

    if has_any(MOUNT_WORDS) {
        return Archetype::Mount;
    }
    if has_any(SIMPLE_WORDS) {
        return Archetype::Simple;
    }
    if has_any(CLASSIC_WORDS) {
        return Archetype::Classic;
    }
    Archetype::Premium
}
