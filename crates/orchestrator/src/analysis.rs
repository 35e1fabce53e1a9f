use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Complexity label attached to every request at analysis time.
/// TRIVIAL and SIMPLE bypass decomposition entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Trivial,
    Simple,
    Compound,
    Complex,
}

impl Complexity {
    pub fn needs_decomposition(&self) -> bool {
        matches!(self, Complexity::Compound | Complexity::Complex)
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Trivial => "TRIVIAL",
            Complexity::Simple => "SIMPLE",
            Complexity::Compound => "COMPOUND",
            Complexity::Complex => "COMPLEX",
        };
        f.write_str(s)
    }
}

/// Result of the analysis stage; recorded verbatim in the progress log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub intent: String,
    pub complexity: Complexity,
}

/// Connector phrases that separate distinct asks inside one prompt.
const CLAUSE_CONNECTORS: [&str; 5] = [", then ", " then ", " and then ", " and also ", "; "];

/// Determines intent and complexity for an incoming prompt.
///
/// Purely lexical: clause connectors and prompt size decide how many
/// distinct asks the prompt carries, which in turn decides whether the
/// decomposer runs at all.
pub struct QueryAnalyzer;

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, prompt: &str) -> Analysis {
        let clauses = split_clauses(prompt);
        let words = prompt.split_whitespace().count();

        let complexity = if clauses.len() >= 3 || words > 120 {
            Complexity::Complex
        } else if clauses.len() == 2 || words > 60 {
            Complexity::Compound
        } else if words > 12 {
            Complexity::Simple
        } else {
            Complexity::Trivial
        };

        let label = match complexity {
            Complexity::Trivial => "direct answer",
            Complexity::Simple => "single-topic answer",
            Complexity::Compound => "two-part answer",
            Complexity::Complex => "multi-part answer",
        };
        let intent = format!("{label}: {}", truncate(prompt, 120));

        debug!(words, clauses = clauses.len(), complexity = %complexity, "prompt analyzed");
        Analysis { intent, complexity }
    }
}

/// Split a prompt into its distinct asks: sentence boundaries first, then
/// connector phrases within each sentence.
pub fn split_clauses(prompt: &str) -> Vec<String> {
    let mut clauses = Vec::new();

    for sentence in prompt.split(['.', '!', '?', '\n']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        let mut parts = vec![sentence.to_string()];
        for connector in CLAUSE_CONNECTORS {
            let split: Vec<String> = parts
                .iter()
                .flat_map(|part| part.split(connector))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            parts = split;
        }
        clauses.extend(parts);
    }

    if clauses.is_empty() {
        clauses.push(prompt.trim().to_string());
    }
    clauses
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
