//! Next-token sequence prediction library.
//!
//! This crate provides a word-level n-gram prediction system including:
//! - A vocabulary tokenizer with reserved end-of-sequence and unknown markers
//! - An n-gram model with precomputed top-N lookup tables and backoff
//! - Parallel batch prediction over a test corpus
//! - Accuracy scoring and benchmark checks over batch predictions
//! - Pipeline configuration and on-disk artifact handling
//!
//! Once trained (or loaded), the tokenizer and the model are immutable and
//! can be shared across threads for concurrent prediction.

/// Error type shared by every module of the crate.
pub mod error;

/// Word ⇄ id vocabulary used to encode corpora and decode predictions.
pub mod tokenizer;

/// N-gram counting, training and prediction.
///
/// Also hosts batch prediction over a whole tokenized corpus.
pub mod model;

/// Accuracy scoring of batch predictions and benchmark evaluation.
pub mod scoring;

/// JSON pipeline configuration (model, score and benchmark sections).
pub mod config;

/// I/O utilities (corpus loading, atomic writes, artifact layout).
pub mod io;

pub use error::{Result, SeqModelError};
pub use model::ngram_model::NgramModel;
pub use tokenizer::{TokenId, Tokenizer};
