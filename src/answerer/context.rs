//! Joins retrieved chunks into the context block handed to the prompt.

use std::collections::HashSet;

use crate::index::Match;

/// Delimiter between chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Context text plus the sources of the chunks it contains.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssembledContext {
    pub context: String,
    pub sources: Vec<String>,
    /// Number of matches that made it into `context`.
    pub used: usize,
}

/// Concatenates match texts in the given order, separated by a blank line.
///
/// With `max_chars`, matches are taken in order while the context stays within
/// the budget, counted in characters rather than bytes; the first match is
/// always kept. Sources are deduplicated and
/// come only from the matches used. An empty slice yields an empty context.
pub fn assemble(matches: &[Match], max_chars: Option<usize>) -> AssembledContext {
    let mut context = String::new();
    let mut sources = Vec::new();
    let mut seen = HashSet::new();
    let mut used = 0;
    let mut chars = 0;

    for m in matches {
        let separator = if used == 0 { "" } else { CHUNK_SEPARATOR };
        let added = separator.chars().count() + m.text.chars().count();
        if let Some(limit) = max_chars
            && used > 0
            && chars + added > limit
        {
            break;
        }

        context.push_str(separator);
        context.push_str(&m.text);
        chars += added;
        used += 1;

        if seen.insert(m.source.as_str()) {
            sources.push(m.source.clone());
        }
    }

    AssembledContext {
        context,
        sources,
        used,
    }
}
