use crate::config::TokenizerKind;
use log;
use std::fmt;
use tiktoken_rs::{CoreBPE, cl100k_base};

/// Token cost of text, shared by the request precheck and the budget loader.
pub enum TokenCounter {
    Bpe(CoreBPE),
    /// Roughly four characters per token.
    Estimate,
}

impl TokenCounter {
    pub fn new(kind: TokenizerKind) -> Self {
        match kind {
            TokenizerKind::Bpe => match cl100k_base() {
                Ok(bpe) => {
                    log::debug!("Token counting with cl100k_base BPE");
                    TokenCounter::Bpe(bpe)
                }
                Err(e) => {
                    log::warn!("Tokenizer unavailable ({}), token counts will be estimated", e);
                    TokenCounter::Estimate
                }
            },
            TokenizerKind::Estimate => TokenCounter::Estimate,
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            TokenCounter::Bpe(bpe) => bpe.encode_ordinary(text).len(),
            TokenCounter::Estimate => text.chars().count() / 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TokenCounter::Bpe(_) => "cl100k_base",
            TokenCounter::Estimate => "estimate",
        }
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenCounter").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_quarter_of_chars() {
        let counter = TokenCounter::new(TokenizerKind::Estimate);
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abc"), 0);
        assert_eq!(counter.count(&"x".repeat(200)), 50);
        assert_eq!(counter.count(&"é".repeat(8)), 2);
    }
}
