// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here.
//
//   bart.rs         — BART encoder-decoder built from Burn nn
//                     blocks, pretrained parameter layout
//   params.rs       — dotted parameter names → ParamIds
//   seq2seq.rs      — ArgumentGenerator trait shared by variants,
//                     shifted-target loss
//   bart_gen.rs     — variant "gen"
//   pointer_gen.rs  — variant "pointer" (copy mechanism)
//   generation.rs   — greedy and top-k / top-p decoding
//   optim.rs        — parameter groups, grouped AdamW,
//                     linear warmup schedule, accumulation
//   genie.rs        — the orchestrator (step protocol)
//   trainer.rs      — training driver
//   evaluator.rs    — test driver
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Lewis et al. (2020) BART

pub mod bart;

pub mod params;

pub mod seq2seq;

pub mod bart_gen;

pub mod pointer_gen;

pub mod generation;

pub mod optim;

/// Model orchestrator
pub mod genie;

/// Training loop with validation and checkpointing
pub mod trainer;

/// Decoding over the test set
pub mod evaluator;
