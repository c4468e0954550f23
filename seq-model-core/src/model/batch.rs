use std::ops::Range;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::ngram_model::NgramModel;
use crate::error::{Result, SeqModelError};
use crate::io;
use crate::tokenizer::TokenId;

/// Number of chunks handed to each CPU, to even out uneven backoff costs.
const CHUNKS_PER_CPU: usize = 8;

/// Ranked predictions for every position of a tokenized test corpus.
///
/// Column `j` holds the prediction made from the `max_prior_token_length`
/// tokens before `j`, best first, and is compared against `actual[j]`. The
/// first `max_prior_token_length` columns have no context and stay empty,
/// as do columns for which the model had nothing to offer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionMatrix {
	max_prior_token_length: usize,
	top_n: usize,
	actual: Vec<TokenId>,
	columns: Vec<Vec<TokenId>>,
}

impl PredictionMatrix {
	pub fn max_prior_token_length(&self) -> usize {
		self.max_prior_token_length
	}

	/// Number of ranks requested per column.
	pub fn top_n(&self) -> usize {
		self.top_n
	}

	/// The tokenized test corpus.
	pub fn actual(&self) -> &[TokenId] {
		&self.actual
	}

	/// Number of columns, equal to the corpus length.
	pub fn len(&self) -> usize {
		self.actual.len()
	}

	pub fn is_empty(&self) -> bool {
		self.actual.is_empty()
	}

	/// Columns that received a context and therefore a prediction attempt.
	pub fn scored_columns(&self) -> Range<usize> {
		self.max_prior_token_length.min(self.len())..self.len()
	}

	/// Ranked predictions for `column`, possibly fewer than `top_n`.
	pub fn predictions(&self, column: usize) -> &[TokenId] {
		self.columns.get(column).map(Vec::as_slice).unwrap_or_default()
	}

	/// Prediction at `rank` (0 = best) for `column`, if one was made.
	pub fn prediction_at(&self, rank: usize, column: usize) -> Option<TokenId> {
		self.predictions(column).get(rank).copied()
	}

	/// Saves the matrix as a postcard blob, written atomically.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let bytes = postcard::to_stdvec(self)?;
		io::write_atomic(&path, &bytes)?;
		info!("Saved {} predictions to {}", self.len(), path.as_ref().display());
		Ok(())
	}

	/// Loads a matrix written by [`PredictionMatrix::save`].
	///
	/// # Errors
	/// Returns [`SeqModelError::CorruptState`] if the blob does not decode or
	/// its columns do not line up with the corpus.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let bytes = io::read_bytes(path)?;
		let matrix: Self = postcard::from_bytes(&bytes).map_err(|e| SeqModelError::corrupt(path, e.to_string()))?;

		if matrix.columns.len() != matrix.actual.len() {
			return Err(SeqModelError::corrupt(
				path,
				format!("{} prediction columns for {} tokens", matrix.columns.len(), matrix.actual.len()),
			));
		}
		if let Some(column) = matrix.columns.iter().position(|c| c.len() > matrix.top_n) {
			return Err(SeqModelError::corrupt(path, format!("column {column} holds more than {} predictions", matrix.top_n)));
		}
		Ok(matrix)
	}
}

/// Predicts the next token at every position of `tokens`.
///
/// Each column `j >= max_prior_token_length` is predicted from the window
/// `tokens[j - max_prior_token_length..j]`. The columns are split in chunks
/// predicted on parallel threads that all share the read-only model.
///
/// # Errors
/// Returns an error if the model is not trained or `top_n > max_top_n`.
pub fn predict_corpus(model: &NgramModel, tokens: &[TokenId], top_n: usize) -> Result<PredictionMatrix> {
	if !model.is_trained() {
		return Err(SeqModelError::InvalidState("batch prediction requires a trained or loaded model".to_owned()));
	}
	if top_n > model.max_top_n() {
		return Err(SeqModelError::InvalidConfiguration(format!(
			"top_n {top_n} exceeds max_top_n {}",
			model.max_top_n()
		)));
	}

	let context_length = model.max_prior_token_length();
	let mut columns: Vec<Vec<TokenId>> = vec![Vec::new(); tokens.len()];
	if tokens.len() > context_length {
		let scored = tokens.len() - context_length;
		let chunks = num_cpus::get() * CHUNKS_PER_CPU;
		let chunk_size = scored.div_ceil(chunks).max(1);
		debug!("Predicting {} columns in chunks of {}", scored, chunk_size);

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for start in (context_length..tokens.len()).step_by(chunk_size) {
				let tx = tx.clone();
				let end = (start + chunk_size).min(tokens.len());

				scope.spawn(move || {
					let rows: Result<Vec<Vec<TokenId>>> = (start..end)
						.map(|column| model.predict(&tokens[column - context_length..column], top_n))
						.collect();
					// The receiver outlives the scope, so sending cannot fail
					let _ = tx.send((start, rows));
				});
			}
		});
		drop(tx);

		for (start, rows) in rx.iter() {
			for (offset, row) in rows?.into_iter().enumerate() {
				columns[start + offset] = row;
			}
		}
	}

	info!("Predicted {} columns with top {}", tokens.len().saturating_sub(context_length), top_n);
	Ok(PredictionMatrix {
		max_prior_token_length: context_length,
		top_n,
		actual: tokens.to_vec(),
		columns,
	})
}
