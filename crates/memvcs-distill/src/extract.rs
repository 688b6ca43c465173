//! Fact extraction: sentence chunking, candidate-fact scraping, and
//! content-hash dedup, grounded on `distiller.py::extract_facts` and the
//! `compression_pipeline`'s sentence-chunk/dedup preprocessing. The LLM
//! path is an optional upgrade over the always-available heuristic one.

use std::collections::HashSet;

use memvcs_objects::sha256_hex;

use crate::llm::LlmProvider;

const SYSTEM_PROMPT: &str = "Extract factual statements from the text. Output as bullet points (one fact per line). Focus on: user preferences, learned facts, key decisions.";
const SENTENCE_MIN: usize = 20;
const SENTENCE_MAX: usize = 300;
const PREFERENCE_WORDS: &[&str] = &["prefers", "likes", "uses", "learned", "user"];

/// Split `text` into sentences on `.`/`!`/`?` boundaries, then greedily
/// pack them into chunks no larger than `max_chars` (the `C_char` cap).
pub fn chunk_by_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    let mut chunks = Vec::new();
    let mut chunk = String::new();
    for sentence in sentences {
        if !chunk.is_empty() && chunk.len() + sentence.len() + 1 > max_chars {
            chunks.push(std::mem::take(&mut chunk));
        }
        if !chunk.is_empty() {
            chunk.push(' ');
        }
        chunk.push_str(&sentence);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

/// Scrape candidate facts from chunked text: a bulleted line is accepted
/// verbatim, a plain sentence only if its length falls in `[20, 300]`.
pub fn candidate_facts(chunks: &[String]) -> Vec<String> {
    let mut facts = Vec::new();
    for chunk in chunks {
        for raw_line in chunk.split('\n') {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    facts.push(format!("- {rest}"));
                }
                continue;
            }
            for sentence in line.split_inclusive(['.', '!', '?']) {
                let sentence = sentence.trim();
                let len = sentence.chars().count();
                if (SENTENCE_MIN..=SENTENCE_MAX).contains(&len) {
                    facts.push(format!("- {sentence}"));
                }
            }
        }
    }
    facts
}

/// Narrower heuristic used as the last-resort fallback (mirrors
/// `distiller.py`'s plain-text scan for preference/decision language).
fn preference_facts(text: &str) -> Vec<String> {
    let mut facts = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.chars().count() <= SENTENCE_MIN || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        let lower = line.to_lowercase();
        if PREFERENCE_WORDS.iter().any(|w| lower.contains(w)) {
            let truncated: String = line.chars().take(200).collect();
            facts.push(format!("- {truncated}"));
        }
    }
    facts
}

/// Drop facts that are duplicates of an earlier one once case and
/// surrounding whitespace are normalized away.
pub fn dedup_facts(facts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for fact in facts {
        let key = sha256_hex(fact.trim().to_lowercase().as_bytes());
        if seen.insert(key) {
            out.push(fact);
        }
    }
    out
}

/// Extract up to `max_facts` short factual strings from `combined_text`
/// for the named cluster topic. Tries the heuristic path first so a
/// result is always available, then — if `llm` is given — lets the
/// provider's output replace it when the call succeeds.
pub fn extract_facts(
    topic: &str,
    combined_text: &str,
    chunk_chars: usize,
    llm: Option<&dyn LlmProvider>,
    max_facts: usize,
) -> Vec<String> {
    let chunks = chunk_by_sentences(combined_text, chunk_chars);
    let compressed: String = chunks.iter().take(20).cloned().collect::<Vec<_>>().join("\n");

    let mut facts = dedup_facts(candidate_facts(&chunks.iter().take(20).cloned().collect::<Vec<_>>()));
    if facts.is_empty() {
        facts = dedup_facts(preference_facts(&compressed));
    }
    facts.truncate(max_facts);
    if facts.is_empty() {
        facts.push(format!("- Learned about {topic}"));
    }

    if let Some(provider) = llm {
        let user = format!("Topic: {topic}\n\n{}", compressed.chars().take(4000).collect::<String>());
        if let Ok(text) = provider.complete(SYSTEM_PROMPT, &user) {
            let llm_facts: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| l.starts_with('-'))
                .take(15)
                .map(str::to_string)
                .collect();
            if !llm_facts.is_empty() {
                facts = dedup_facts(llm_facts);
                facts.truncate(max_facts);
            }
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_the_char_cap() {
        let text = "One sentence. Another one here. A third sentence follows. And a fourth.";
        let chunks = chunk_by_sentences(text, 30);
        assert!(chunks.iter().all(|c| c.len() <= 40));
        assert!(chunks.len() > 1);
    }

    #[test]
    fn bullet_lines_pass_through_regardless_of_length() {
        let chunks = vec!["- ok".to_string()];
        let facts = candidate_facts(&chunks);
        assert_eq!(facts, vec!["- ok".to_string()]);
    }

    #[test]
    fn sentences_outside_length_window_are_dropped() {
        let chunks = vec!["Hi. This sentence is definitely long enough to qualify as a fact.".to_string()];
        let facts = candidate_facts(&chunks);
        assert_eq!(facts.len(), 1);
        assert!(facts[0].contains("definitely long enough"));
    }

    #[test]
    fn dedup_is_case_and_whitespace_insensitive() {
        let facts = vec!["- Hello World".to_string(), "-  hello world  ".to_string()];
        assert_eq!(dedup_facts(facts).len(), 1);
    }

    #[test]
    fn extract_facts_never_returns_empty() {
        let facts = extract_facts("widgets", "nothing interesting here", 512, None, 10);
        assert_eq!(facts, vec!["- Learned about widgets".to_string()]);
    }
}
