use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqModelError};
use crate::scoring::BenchmarkCondition;

/// Shape of the n-gram model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelConfig {
	/// Maximum number of preceding tokens used as context.
	pub max_prior_token_length: usize,
	/// Maximum number of ranked candidates kept per context.
	pub max_top_n: usize,
}

/// How batch predictions are scored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ScoreConfig {
	/// Number of top-ranked predictions counted as a hit. Defaults to `max_top_n`.
	#[serde(default)]
	pub num_preds: Option<usize>,
}

/// Conditions a score report must meet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BenchmarkConfig {
	#[serde(default)]
	pub conditions: Vec<BenchmarkCondition>,
}

/// Configuration shared by the train, predict, score and benchmark steps.
///
/// Example:
/// ```json
/// {
///   "model": { "max_prior_token_length": 3, "max_top_n": 5 },
///   "score": { "num_preds": 3 },
///   "benchmark": {
///     "conditions": [ { "metric": "accuracy", "condition": ">=", "benchmark": 0.2 } ]
///   }
/// }
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
	pub model: ModelConfig,
	#[serde(default)]
	pub score: ScoreConfig,
	#[serde(default)]
	pub benchmark: BenchmarkConfig,
}

impl PipelineConfig {
	/// Reads and validates a JSON configuration file.
	///
	/// # Errors
	/// Returns [`SeqModelError::InvalidConfiguration`] if the document does not
	/// decode or fails [`PipelineConfig::validate`].
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let contents = fs::read_to_string(path).map_err(|e| SeqModelError::io(path, e))?;
		let config: Self = serde_json::from_str(&contents)
			.map_err(|e| SeqModelError::InvalidConfiguration(format!("{}: {e}", path.display())))?;
		config.validate()?;
		Ok(config)
	}

	/// Checks the values that deserialization alone cannot.
	pub fn validate(&self) -> Result<()> {
		if self.model.max_top_n == 0 {
			return Err(SeqModelError::InvalidConfiguration("model.max_top_n must be >= 1".to_owned()));
		}
		if let Some(num_preds) = self.score.num_preds {
			if num_preds == 0 || num_preds > self.model.max_top_n {
				return Err(SeqModelError::InvalidConfiguration(format!(
					"score.num_preds must be within 1..={}, got {num_preds}",
					self.model.max_top_n
				)));
			}
		}
		Ok(())
	}

	/// Number of predictions used for scoring.
	pub fn num_preds(&self) -> usize {
		self.score.num_preds.unwrap_or(self.model.max_top_n)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scoring::Comparison;
	use assert_matches::assert_matches;

	fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		fs::write(&path, contents).unwrap();
		(dir, path)
	}

	#[test]
	fn loads_full_config() {
		let (_dir, path) = write(
			r#"{
				"model": { "max_prior_token_length": 3, "max_top_n": 5 },
				"score": { "num_preds": 2 },
				"benchmark": {
					"conditions": [ { "metric": "accuracy", "condition": ">=", "benchmark": 0.25 } ]
				}
			}"#,
		);

		let config = PipelineConfig::load(&path).unwrap();
		assert_eq!(config.model, ModelConfig { max_prior_token_length: 3, max_top_n: 5 });
		assert_eq!(config.num_preds(), 2);
		assert_eq!(config.benchmark.conditions.len(), 1);
		assert_eq!(config.benchmark.conditions[0].condition, Comparison::GreaterOrEqual);
	}

	#[test]
	fn optional_sections_default() {
		let (_dir, path) = write(r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 4 } }"#);

		let config = PipelineConfig::load(&path).unwrap();
		assert_eq!(config.num_preds(), 4);
		assert!(config.benchmark.conditions.is_empty());
	}

	#[test]
	fn rejects_num_preds_above_max_top_n() {
		let (_dir, path) = write(
			r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 2 }, "score": { "num_preds": 3 } }"#,
		);

		assert_matches!(PipelineConfig::load(&path), Err(SeqModelError::InvalidConfiguration(_)));
	}

	#[test]
	fn rejects_negative_context_length() {
		let (_dir, path) = write(r#"{ "model": { "max_prior_token_length": -1, "max_top_n": 2 } }"#);

		assert_matches!(PipelineConfig::load(&path), Err(SeqModelError::InvalidConfiguration(_)));
	}

	#[test]
	fn rejects_zero_max_top_n() {
		let (_dir, path) = write(r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 0 } }"#);

		assert_matches!(PipelineConfig::load(&path), Err(SeqModelError::InvalidConfiguration(_)));
	}

	#[test]
	fn rejects_unknown_comparison() {
		let (_dir, path) = write(
			r#"{
				"model": { "max_prior_token_length": 1, "max_top_n": 2 },
				"benchmark": { "conditions": [ { "metric": "accuracy", "condition": "==", "benchmark": 1.0 } ] }
			}"#,
		);

		assert_matches!(PipelineConfig::load(&path), Err(SeqModelError::InvalidConfiguration(_)));
	}
}
