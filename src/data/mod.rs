// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From preprocessed JSON-lines files to tensor batches:
//
//   train.jsonl / val.jsonl / test.jsonl
//       │
//       ▼
//   ArgumentDataset   → implements Burn's Dataset trait
//       │
//       ▼
//   ArgumentBatcher   → pads and stacks samples into tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the trainer / evaluator
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Preprocessed examples loaded from JSON lines
pub mod dataset;

/// Implements Burn's Batcher trait to create padded tensor batches
pub mod batcher;
