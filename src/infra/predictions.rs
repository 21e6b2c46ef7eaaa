// ============================================================
// Layer 6 — Prediction Writer
// ============================================================
// Writes decoded predictions as JSON lines, one object per
// example, in the order they are given:
//
//   {"doc_key": "...", "predicted": "...", "input": "..."}
//
// An existing file is truncated.

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use crate::domain::prediction::PredictionRecord;

pub const PREDICTIONS_FILE: &str = "predictions.jsonl";

/// Returns the number of lines written.
pub fn write_predictions(
    path:    &Path,
    records: impl IntoIterator<Item = PredictionRecord>,
) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }

    let file = fs::File::create(path)
        .with_context(|| format!("Cannot write predictions to '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut count = 0usize;
    for record in records {
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;

    tracing::info!("Wrote {} predictions to '{}'", count, path.display());
    Ok(count)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_object_per_line_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(PREDICTIONS_FILE);

        let first = vec![
            PredictionRecord::new("a", "x", "in a"),
            PredictionRecord::new("b", "y", "in b"),
            PredictionRecord::new("c", "z", "in c"),
        ];
        assert_eq!(write_predictions(&path, first).unwrap(), 3);
        assert_eq!(write_predictions(&path, vec![PredictionRecord::new("d", "w", "in d")]).unwrap(), 1);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"doc_key":"d","predicted":"w","input":"in d"}"#]);
    }
}
