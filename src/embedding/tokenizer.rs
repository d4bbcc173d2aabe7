/// Shared word tokenizer for lexical indexing and querying
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Lowercasing word-boundary tokenizer backed by a tantivy analyzer.
///
/// A word is a maximal run of alphanumeric characters. The lexical index
/// registers [`Tokenizer::analyzer`] on its text field, so stored documents
/// and the terms produced by [`Tokenizer::tokenize`] always agree.
#[derive(Clone)]
pub struct Tokenizer {
    analyzer: TextAnalyzer,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            analyzer: TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(LowerCaser)
                .build(),
        }
    }

    /// The analyzer to register on indexed text fields
    pub fn analyzer(&self) -> TextAnalyzer {
        self.analyzer.clone()
    }

    /// Split text into lowercase word tokens
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_and_boundaries() {
        let tokens = Tokenizer::new().tokenize("Hello, World! foo_bar 42x");
        assert_eq!(tokens, vec!["hello", "world", "foo", "bar", "42x"]);
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        let tokenizer = Tokenizer::new();
        assert!(tokenizer.tokenize("").is_empty());
        assert!(tokenizer.tokenize("... --- !!!").is_empty());
    }

    #[test]
    fn test_unicode_words() {
        let tokens = Tokenizer::new().tokenize("Café Überraschung");
        assert_eq!(tokens, vec!["café", "überraschung"]);
    }

    #[test]
    fn test_whitespace_never_in_tokens() {
        let tokens = Tokenizer::new().tokenize("tab\tseparated\nlines  here");
        assert!(tokens.iter().all(|t| !t.contains(char::is_whitespace)));
        assert_eq!(tokens.len(), 4);
    }
}
