use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SeqModelError>;

/// Every failure the library can surface to a caller.
///
/// Lookups of unseen contexts are not errors: they are resolved by backoff
/// inside [`crate::NgramModel::predict`] and never reach this type.
#[derive(Error, Debug)]
pub enum SeqModelError {
	/// The prior-token context is as long as (or longer than) the n-grams the
	/// model was trained on. Callers usually log this and fall back to an
	/// empty prediction.
	#[error("context of {context_length} tokens is too long, it must be shorter than the max n-gram length {max_ngram_length}")]
	ContextTooLong {
		context_length: usize,
		max_ngram_length: usize,
	},

	/// A persisted snapshot could not be decoded or violates an invariant.
	#[error("corrupt state in '{}': {reason}", path.display())]
	CorruptState { path: PathBuf, reason: String },

	#[error("invalid configuration: {0}")]
	InvalidConfiguration(String),

	/// An operation was invoked outside of the `count -> train -> predict` order.
	#[error("invalid state: {0}")]
	InvalidState(String),

	#[error("file I/O error on '{}'", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl SeqModelError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io { path: path.into(), source }
	}

	pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
		Self::CorruptState { path: path.into(), reason: reason.into() }
	}
}

impl From<postcard::Error> for SeqModelError {
	fn from(e: postcard::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}

impl From<serde_json::Error> for SeqModelError {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}
