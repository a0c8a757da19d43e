//! Fallback lexical index
//!
//! Serves queries when the vector path is degraded, empty, or failing.
//! Local corpus files are split into fixed-size overlapping character
//! windows once per process; scoring is plain substring and token matching.

use passage_common::config::FallbackConfig;
use passage_common::errors::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::Chunk;

const FALLBACK_COLLECTION: &str = "fallback";

struct Window {
    source_file: String,
    index: usize,
    text: String,
    text_lower: String,
}

/// Immutable lexical index over a local text corpus
pub struct FallbackIndex {
    windows: Vec<Window>,
    top_k: usize,
}

impl FallbackIndex {
    /// Build the index from the configured corpus directory. A missing or
    /// empty directory yields an empty index, which serves empty results.
    pub fn build(config: &FallbackConfig) -> Result<Self> {
        let mut documents = Vec::new();
        let root = Path::new(&config.corpus_dir);

        if root.is_dir() {
            collect_files(root, &mut documents)?;
        } else {
            warn!(dir = %config.corpus_dir, "Fallback corpus directory not found");
        }

        Ok(Self::from_documents(documents, config))
    }

    /// Build from in-memory (name, text) documents
    pub fn from_documents(documents: Vec<(String, String)>, config: &FallbackConfig) -> Self {
        let mut windows = Vec::new();

        for (source_file, text) in documents {
            for (index, window) in
                split_windows(&text, config.window_size, config.window_overlap)
                    .into_iter()
                    .enumerate()
            {
                windows.push(Window {
                    text_lower: window.to_lowercase(),
                    source_file: source_file.clone(),
                    index,
                    text: window,
                });
            }
        }

        debug!(windows = windows.len(), "Fallback index built");

        Self {
            windows,
            top_k: config.top_k,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Score every window against the query and return the top matches.
    ///
    /// Score = 2 x occurrences of the full query as a substring, plus the
    /// number of distinct query/context tokens present. Zero-score windows
    /// are excluded; ties keep corpus order.
    pub fn search(&self, query: &str, context: Option<&str>) -> Vec<Chunk> {
        let needle = query.trim().to_lowercase();

        let mut tokens: HashSet<String> = needle
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        if let Some(ctx) = context {
            tokens.extend(ctx.to_lowercase().split_whitespace().map(|t| t.to_string()));
        }

        let mut scored: Vec<(u64, &Window)> = self
            .windows
            .iter()
            .filter_map(|window| {
                let occurrences = if needle.is_empty() {
                    0
                } else {
                    window.text_lower.matches(&needle).count() as u64
                };
                let token_hits = tokens
                    .iter()
                    .filter(|t| window.text_lower.contains(t.as_str()))
                    .count() as u64;

                let score = 2 * occurrences + token_hits;
                (score > 0).then_some((score, window))
            })
            .collect();

        // sort_by_key is stable; ties keep corpus order
        scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
        scored.truncate(self.top_k);

        scored
            .into_iter()
            .map(|(score, window)| Chunk {
                chunk_id: format!("{}:{}", window.source_file, window.index),
                collection_name: FALLBACK_COLLECTION.to_string(),
                text: window.text.clone(),
                source_file: window.source_file.clone(),
                page_number: None,
                similarity_score: score as f32,
                rerank_score: None,
            })
            .collect()
    }
}

/// Recursively gather readable text files under a directory
fn collect_files(dir: &Path, documents: &mut Vec<(String, String)>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, documents)?;
            continue;
        }

        let is_text = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        );
        if !is_text {
            continue;
        }

        match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                documents.push((path.display().to_string(), text));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable corpus file");
            }
        }
    }

    Ok(())
}

/// Split text into overlapping character windows. The stride is
/// `size - overlap`; the final window always reaches the end of the text
/// with no content gap.
fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }

    let stride = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FallbackConfig {
        FallbackConfig::default()
    }

    #[test]
    fn test_windowing_covers_text_without_gap() {
        // 1000 chars with window 900 / overlap 200 must yield exactly
        // [0..900] and [700..1000]
        let text: String = std::iter::repeat('x').take(1000).collect();
        let windows = split_windows(&text, 900, 200);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].chars().count(), 900);
        assert_eq!(windows[1].chars().count(), 300);
    }

    #[test]
    fn test_short_text_is_a_single_window() {
        let windows = split_windows("short", 900, 200);
        assert_eq!(windows, vec!["short".to_string()]);
    }

    #[test]
    fn test_substring_matches_outrank_token_matches() {
        let index = FallbackIndex::from_documents(
            vec![
                ("a.txt".to_string(), "consent is required before collection".to_string()),
                ("b.txt".to_string(), "data consent obligations: consent obligations apply".to_string()),
            ],
            &config(),
        );

        let results = index.search("consent obligations", None);
        assert_eq!(results.len(), 2);
        // b.txt contains the full phrase twice: 2*2 + 2 tokens = 6
        assert_eq!(results[0].source_file, "b.txt");
        assert_eq!(results[0].similarity_score, 6.0);
        assert_eq!(results[0].collection_name, "fallback");
    }

    #[test]
    fn test_zero_score_windows_are_excluded() {
        let index = FallbackIndex::from_documents(
            vec![("a.txt".to_string(), "irrelevant material here".to_string())],
            &config(),
        );
        assert!(index.search("breach notification", None).is_empty());
    }

    #[test]
    fn test_context_tokens_count_toward_score() {
        let index = FallbackIndex::from_documents(
            vec![
                ("a.txt".to_string(), "retention schedules for records".to_string()),
                ("b.txt".to_string(), "unrelated passage".to_string()),
            ],
            &config(),
        );

        let with_ctx = index.search("schedules", Some("retention records"));
        let without_ctx = index.search("schedules", None);
        assert!(with_ctx[0].similarity_score > without_ctx[0].similarity_score);

        // Nothing matches the second file either way
        assert!(with_ctx.iter().all(|c| c.source_file == "a.txt"));
    }

    #[test]
    fn test_empty_corpus_serves_empty_results() {
        let index = FallbackIndex::from_documents(Vec::new(), &config());
        assert!(index.is_empty());
        assert!(index.search("anything", None).is_empty());
    }

    #[test]
    fn test_top_k_truncation_is_stable() {
        let documents: Vec<(String, String)> = (0..8)
            .map(|i| (format!("f{}.txt", i), "the same matching text".to_string()))
            .collect();
        let index = FallbackIndex::from_documents(documents, &config());

        let results = index.search("matching", None);
        assert_eq!(results.len(), 5);
        // Equal scores keep corpus order
        let files: Vec<&str> = results.iter().map(|c| c.source_file.as_str()).collect();
        assert_eq!(files, vec!["f0.txt", "f1.txt", "f2.txt", "f3.txt", "f4.txt"]);
    }
}
