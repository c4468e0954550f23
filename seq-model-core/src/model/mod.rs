//! N-gram modelling for next-token prediction.
//!
//! - Counting, training and prediction (`NgramModel`)
//! - Per-length top-N prediction index (`LookupTable`)
//! - Parallel prediction over a whole corpus (`predict_corpus`)

/// Word-level n-gram model over token ids.
///
/// Handles n-gram counting, probability computation, top-N lookup table
/// construction, prediction with backoff, and snapshot persistence.
pub mod ngram_model;

/// Ranked next-token candidates for every observed prefix of one n-gram length.
pub mod lookup_table;

/// Batch prediction over a tokenized corpus and its persisted result.
pub mod batch;

pub use batch::{PredictionMatrix, predict_corpus};
pub use lookup_table::{LookupTable, Ngram};
pub use ngram_model::NgramModel;
