use std::fmt;
use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqModelError};
use crate::io;
use crate::model::PredictionMatrix;

/// Top-N accuracy of a batch of predictions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScoreReport {
	/// Fraction of scored columns whose actual token is among the first `num_preds` predictions.
	pub accuracy: f64,
	pub num_preds: usize,
	/// Ranks available in the prediction matrix.
	pub max_top_n: usize,
	/// Number of scored columns.
	pub evaluated: usize,
	pub correct: usize,
}

impl ScoreReport {
	/// Looks a numeric metric up by name, for benchmark conditions.
	pub fn metric(&self, name: &str) -> Option<f64> {
		match name {
			"accuracy" => Some(self.accuracy),
			"num_preds" => Some(self.num_preds as f64),
			"max_top_n" => Some(self.max_top_n as f64),
			"evaluated" => Some(self.evaluated as f64),
			"correct" => Some(self.correct as f64),
			_ => None,
		}
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_json(path, self)
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		io::read_json(path)
	}
}

/// Scores `matrix` by checking, for each scored column, whether the actual
/// token is among its first `num_preds` predictions.
///
/// # Errors
/// Returns an error if `num_preds` is 0 or exceeds the matrix's `top_n`.
pub fn score_predictions(matrix: &PredictionMatrix, num_preds: usize) -> Result<ScoreReport> {
	if num_preds == 0 || num_preds > matrix.top_n() {
		return Err(SeqModelError::InvalidConfiguration(format!(
			"only {} predictions exist per column but {num_preds} were requested",
			matrix.top_n()
		)));
	}

	let columns = matrix.scored_columns();
	let evaluated = columns.len();
	let correct = columns
		.filter(|&column| {
			let predictions = matrix.predictions(column);
			predictions[..num_preds.min(predictions.len())].contains(&matrix.actual()[column])
		})
		.count();
	let accuracy = if evaluated == 0 { 0.0 } else { correct as f64 / evaluated as f64 };

	info!("Accuracy over {} columns with top {}: {:.4}", evaluated, num_preds, accuracy);
	Ok(ScoreReport { accuracy, num_preds, max_top_n: matrix.top_n(), evaluated, correct })
}

/// Comparison applied between a metric and its benchmark value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
	#[serde(rename = ">")]
	Greater,
	#[serde(rename = ">=")]
	GreaterOrEqual,
	#[serde(rename = "<")]
	Less,
	#[serde(rename = "<=")]
	LessOrEqual,
}

impl Comparison {
	/// Returns true if `value <op> benchmark` holds.
	pub fn holds(self, value: f64, benchmark: f64) -> bool {
		match self {
			Comparison::Greater => value > benchmark,
			Comparison::GreaterOrEqual => value >= benchmark,
			Comparison::Less => value < benchmark,
			Comparison::LessOrEqual => value <= benchmark,
		}
	}
}

impl fmt::Display for Comparison {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let symbol = match self {
			Comparison::Greater => ">",
			Comparison::GreaterOrEqual => ">=",
			Comparison::Less => "<",
			Comparison::LessOrEqual => "<=",
		};
		f.write_str(symbol)
	}
}

/// A single `metric <condition> benchmark` requirement.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BenchmarkCondition {
	pub metric: String,
	pub condition: Comparison,
	pub benchmark: f64,
}

/// How one condition fared. `value` and `met` are `None` when the metric is missing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BenchmarkOutcome {
	#[serde(flatten)]
	pub condition: BenchmarkCondition,
	pub value: Option<f64>,
	pub met: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BenchmarkReport {
	/// True if no evaluated condition failed.
	pub benchmarks_met: bool,
	pub outcomes: Vec<BenchmarkOutcome>,
}

impl BenchmarkReport {
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_json(path, self)
	}
}

/// Checks every condition against the metrics of `report`.
///
/// A condition naming a metric the report does not have is logged and
/// skipped; it does not fail the benchmark.
pub fn run_benchmarks(report: &ScoreReport, conditions: &[BenchmarkCondition]) -> BenchmarkReport {
	let mut benchmarks_met = true;
	let mut outcomes = Vec::with_capacity(conditions.len());

	for condition in conditions {
		let value = report.metric(&condition.metric);
		let met = match value {
			None => {
				error!("Metric {} is not included in the score report", condition.metric);
				None
			}
			Some(value) => {
				info!("Checking benchmark {}", condition.metric);
				let met = condition.condition.holds(value, condition.benchmark);
				if !met {
					error!(
						"Benchmark({}) not met: {} {} {} is false",
						condition.metric, value, condition.condition, condition.benchmark
					);
					benchmarks_met = false;
				}
				Some(met)
			}
		};
		outcomes.push(BenchmarkOutcome { condition: condition.clone(), value, met });
	}

	if benchmarks_met {
		info!("All benchmarks met");
	}
	BenchmarkReport { benchmarks_met, outcomes }
}
