//! Query refinement suggestions drawn from the top results

use super::SearchResult;
use crate::embedding::Tokenizer;
use std::collections::{HashMap, HashSet};

const TOP_RESULTS: usize = 5;
const PREFIX_CHARS: usize = 200;
const MIN_TERM_CHARS: usize = 4;
const MAX_SUGGESTIONS: usize = 3;

/// Suggest `"<query> <term>"` refinements.
///
/// Terms come from the first characters of the top results, must be longer
/// than three characters and absent from the query, and are ranked by
/// frequency with first appearance breaking ties.
pub fn generate_suggestions(tokenizer: &Tokenizer, query: &str, results: &[SearchResult]) -> Vec<String> {
    if results.is_empty() {
        return Vec::new();
    }

    let query_terms: HashSet<String> = tokenizer.tokenize(query).into_iter().collect();

    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for result in results.iter().take(TOP_RESULTS) {
        let prefix: String = result.content.chars().take(PREFIX_CHARS).collect();
        for term in tokenizer.tokenize(&prefix) {
            if term.chars().count() < MIN_TERM_CHARS || query_terms.contains(&term) {
                continue;
            }
            let count = counts.entry(term.clone()).or_insert(0);
            if *count == 0 {
                order.push(term);
            }
            *count += 1;
        }
    }

    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|term| format!("{} {}", query.trim(), term))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ComponentScores;
    use std::collections::HashMap;

    fn result(content: &str) -> SearchResult {
        SearchResult {
            chunk_id: "c".to_string(),
            file_id: "f".to_string(),
            filename: "f.txt".to_string(),
            content: content.to_string(),
            content_type: "text".to_string(),
            chunk_index: 0,
            metadata: HashMap::new(),
            score: 1.0,
            component_scores: ComponentScores::default(),
        }
    }

    #[test]
    fn test_most_frequent_terms_first() {
        let results = vec![
            result("rust ownership borrowing lifetimes"),
            result("ownership rules and borrowing"),
            result("ownership again"),
        ];
        let suggestions = generate_suggestions(&Tokenizer::new(), "rust", &results);
        assert_eq!(
            suggestions,
            vec!["rust ownership", "rust borrowing", "rust lifetimes"]
        );
    }

    #[test]
    fn test_short_and_query_terms_excluded() {
        let results = vec![result("the cat sat on a mat by an apple")];
        let suggestions = generate_suggestions(&Tokenizer::new(), "apple", &results);
        assert!(suggestions.is_empty());
    }

    #[test]
    fn test_only_prefix_considered() {
        let mut long = "word ".repeat(40);
        long.push_str("zebra");
        let suggestions = generate_suggestions(&Tokenizer::new(), "q", &[result(&long)]);
        assert_eq!(suggestions, vec!["q word"]);
    }

    #[test]
    fn test_no_results() {
        assert!(generate_suggestions(&Tokenizer::new(), "q", &[]).is_empty());
    }
}
