//! Derives a deliberately sparse set of category labels from an image prompt.
//!
//! Broad tag sets over-constrain similarity search and cause cache hits on
//! dissimilar content, so output is capped at one location label plus an
//! optional "night" label.

const LOCATION_GROUPS: &[(&str, &[&str])] = &[
    ("forest", &["forest", "woods", "trees"]),
    ("building", &["house", "mansion", "building", "room", "door"]),
    ("hospital", &["hospital", "asylum", "clinic", "ward"]),
    ("cemetery", &["cemetery", "graveyard", "grave", "tomb"]),
    ("corridor", &["corridor", "hallway", "tunnel"]),
];

const NIGHT_WORDS: &[&str] = &["night", "midnight"];

/// Pure function of the prompt text. Unmatched prompts yield an empty vec.
pub fn extract_tags(prompt: &str) -> Vec<String> {
    let lower = prompt.to_lowercase();
    let mut tags = Vec::with_capacity(2);

    for (label, words) in LOCATION_GROUPS {
        if words.iter().any(|w| lower.contains(w)) {
            tags.push(label.to_string());
            break;
        }
    }

    if NIGHT_WORDS.iter().any(|w| lower.contains(w)) {
        tags.push("night".to_string());
    }

    tags
}
