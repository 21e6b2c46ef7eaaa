// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system concerns shared by training and evaluation:
//
//   tokenizer_store.rs — loads the pretrained tokenizer and
//                        registers the marker tokens
//
//   pretrained.rs      — reads config.json and imports
//                        pytorch_model.bin into the BART module
//
//   checkpoint.rs      — per-epoch weights via CompactRecorder,
//                        latest_epoch.json and run_config.json
//
//   metrics.rs         — one CSV row per training epoch
//
//   predictions.rs     — predictions.jsonl writer
//
// Reference: Burn Book §5 (Checkpointing)

pub mod checkpoint;

pub mod tokenizer_store;

pub mod pretrained;

pub mod metrics;

pub mod predictions;
