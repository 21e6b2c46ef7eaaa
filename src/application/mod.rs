// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Wires config → data → model variant → driver.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern

// The training workflow
pub mod train_use_case;

// Decoding the test set with a trained checkpoint
pub mod test_use_case;
