//! Core interpretation logic.
//!
//! The engine walks basic blocks directly, applying instruction semantics
//! with no code generation: a pure tree-walking evaluator. Control flow,
//! the call protocol, and module initialization live in [`engine`]; the
//! per-instruction evaluator lives in `eval`.

pub mod engine;
mod eval;
