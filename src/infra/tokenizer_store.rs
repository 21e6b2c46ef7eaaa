// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the pretrained tokenizer.json shipped with the BART
// checkpoint and extends it with the argument/trigger markers.
//
// Markers are registered as ordinary (non-special) added tokens,
// so they stay visible when predictions are decoded with
// special tokens skipped.

use anyhow::Result;
use std::path::PathBuf;
use tokenizers::{AddedToken, Tokenizer};

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    /// Load `<dir>/tokenizer.json`
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join("tokenizer.json");
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))
    }
}

/// Register `markers` as added tokens. Returns how many were new.
pub fn add_marker_tokens(tokenizer: &mut Tokenizer, markers: &[&str]) -> usize {
    let tokens: Vec<AddedToken> = markers
        .iter()
        .map(|m| AddedToken::from(m.to_string(), false))
        .collect();
    let added = tokenizer.add_tokens(&tokens);
    tracing::debug!(
        "Added {} marker tokens, vocabulary is now {}",
        added,
        tokenizer.get_vocab_size(true)
    );
    added
}

// ─── Test fixture ─────────────────────────────────────────────────────────────
/// A word-level tokenizer with BART's special-token ids
/// (<s>=0, <pad>=1, </s>=2, <unk>=3) and six words, ids 4..=9.
#[cfg(test)]
pub(crate) fn write_test_tokenizer(dir: &std::path::Path) -> PathBuf {
    let special = |id: u32, content: &str| serde_json::json!({
        "id": id, "content": content, "single_word": false, "lstrip": false,
        "rstrip": false, "normalized": false, "special": true
    });

    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            special(0, "<s>"),
            special(1, "<pad>"),
            special(2, "</s>"),
            special(3, "<unk>")
        ],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3,
                "the": 4, "attack": 5, "killed": 6, "people": 7, "in": 8, "city": 9
            },
            "unk_token": "<unk>"
        }
    });

    let path = dir.join("tokenizer.json");
    std::fs::write(&path, serde_json::to_string_pretty(&tokenizer_json).unwrap()).unwrap();
    path
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_extend_vocabulary_once() {
        let dir = tempfile::tempdir().unwrap();
        write_test_tokenizer(dir.path());

        let mut tokenizer = TokenizerStore::new(dir.path().to_string_lossy()).load().unwrap();
        assert_eq!(tokenizer.get_vocab_size(true), 10);

        assert_eq!(add_marker_tokens(&mut tokenizer, &[" <arg>", " <tgr>"]), 2);
        assert_eq!(tokenizer.get_vocab_size(true), 12);
        assert!(tokenizer.token_to_id(" <arg>").is_some());

        // already present
        assert_eq!(add_marker_tokens(&mut tokenizer, &[" <arg>"]), 0);
    }

    #[test]
    fn decoding_skips_special_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_test_tokenizer(dir.path());
        let tokenizer = TokenizerStore::new(dir.path().to_string_lossy()).load().unwrap();

        let text = tokenizer.decode(&[0, 4, 5, 2, 1, 1], true).unwrap();
        assert_eq!(text, "the attack");
    }

    #[test]
    fn missing_tokenizer_reports_path() {
        let err = TokenizerStore::new("does/not/exist").load().unwrap_err();
        assert!(err.to_string().contains("does/not/exist"));
    }
}
