// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and enums describing a run:
//
//   config.rs     — RunConfig (every hyperparameter of a run)
//                   and ModelVariant (gen / pointer)
//
//   prediction.rs — PredictionRecord, one decoded example
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O
//
// Reference: Rust Book §5 (Structs), §6 (Enums)

/// Run configuration and model variant selection
pub mod config;

/// Decoded prediction for one document
pub mod prediction;
