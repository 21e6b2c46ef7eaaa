// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:       the epoch number (1, 2, 3, ...)
//   - global_step: optimizer steps taken so far
//   - train_loss:  mean "train/loss" over the epoch's batches
//   - val_loss:    "val/loss" from validation_epoch_end
//   - lr:          learning rate used by the last optimizer step
//
// Output file: <ckpt_dir>/metrics.csv
//
//   epoch,global_step,train_loss,val_loss,lr
//   1,250,2.314500,2.108900,0.000009
//   2,500,1.874100,1.902300,0.000006

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch:       usize,
    /// Optimizer steps taken up to the end of this epoch
    pub global_step: usize,
    /// Mean per-batch "train/loss" over the epoch
    pub train_loss:  f64,
    /// "val/loss"; NaN when the validation set is empty
    pub val_loss:    f64,
    /// Learning rate of the last optimizer step
    pub lr:          f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, global_step: usize, train_loss: f64, val_loss: f64, lr: f64) -> Self {
        Self { epoch, global_step, train_loss, val_loss, lr }
    }

    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");

        // Appending across runs keeps one header
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,global_step,train_loss,val_loss,lr")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{},{:.6},{:.6},{:e}",
            m.epoch,
            m.global_step,
            m.train_loss,
            m.val_loss,
            m.lr,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train/loss={:.4}, val/loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 40, 2.5, 2.3, 1e-5);
        assert!(m.is_improvement(3.0));
        assert!(!m.is_improvement(2.0));
        // NaN never counts as better
        assert!(!EpochMetrics::new(1, 1, 1.0, f64::NAN, 0.0).is_improvement(f64::INFINITY));
    }

    #[test]
    fn rows_are_appended_under_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path().to_string_lossy()).unwrap();
        logger.log(&EpochMetrics::new(1, 10, 2.0, 1.5, 1e-5)).unwrap();

        let again = MetricsLogger::new(dir.path().to_string_lossy()).unwrap();
        again.log(&EpochMetrics::new(2, 20, 1.0, 0.5, 5e-6)).unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,global_step,train_loss,val_loss,lr");
        assert!(lines[1].starts_with("1,10,2.000000,1.500000,"));
        assert!(lines[2].starts_with("2,20,"));
    }
}
