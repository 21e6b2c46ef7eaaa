// ============================================================
// Layer 3 — PredictionRecord Domain Type
// ============================================================
// One line of predictions.jsonl:
//
//   {"doc_key": "...", "predicted": "...", "input": "..."}
//
// `predicted` is the decoded model output, `input` is the
// decoded encoder input so the line can be read on its own.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub doc_key:   String,
    pub predicted: String,
    pub input:     String,
}

impl PredictionRecord {
    pub fn new(
        doc_key:   impl Into<String>,
        predicted: impl Into<String>,
        input:     impl Into<String>,
    ) -> Self {
        Self {
            doc_key:   doc_key.into(),
            predicted: predicted.into(),
            input:     input.into(),
        }
    }
}
