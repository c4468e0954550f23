use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use seq_model_core::config::PipelineConfig;
use seq_model_core::io::{self, ArtifactPaths};
use seq_model_core::model::{PredictionMatrix, predict_corpus};
use seq_model_core::scoring::{ScoreReport, run_benchmarks, score_predictions};
use seq_model_core::{NgramModel, SeqModelError, Tokenizer};

const PREDICTIONS_FILE: &str = "predictions.bin";
const SCORE_REPORT_FILE: &str = "score_report.json";
const BENCHMARK_REPORT_FILE: &str = "benchmark.json";

/// Process exit status when a benchmark condition fails.
const BENCHMARKS_NOT_MET: i32 = 2;

#[derive(Parser)]
#[command(author, version, about = "Train, run and evaluate n-gram next-word models", long_about = None)]
struct Cli {
	/// Pipeline configuration file (JSON)
	#[arg(short, long, value_name = "FILE", env = "SEQ_MODEL_CONFIG", global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Train the tokenizer and the model on a whitespace-separated corpus
	Train {
		/// Training corpus
		#[arg(long, env = "SEQ_MODEL_TRAIN_DATA")]
		dataset: PathBuf,

		/// Directory receiving the model and tokenizer
		#[arg(long, env = "SEQ_MODEL_ARTIFACTS")]
		model_artifacts: PathBuf,
	},

	/// Predict the next word at every position of a test corpus
	Predict {
		/// Test corpus
		#[arg(long, env = "SEQ_MODEL_TEST_DATA")]
		dataset: PathBuf,

		/// Directory holding the trained model and tokenizer
		#[arg(long, env = "SEQ_MODEL_ARTIFACTS")]
		model_artifacts: PathBuf,

		/// Directory receiving the predictions
		#[arg(long)]
		predictions_folder: PathBuf,
	},

	/// Compute the top-N accuracy of saved predictions
	Score {
		/// Directory holding the predictions
		#[arg(long)]
		predictions_folder: PathBuf,

		/// Directory receiving the score report
		#[arg(long)]
		score_report_folder: PathBuf,
	},

	/// Check a score report against the configured benchmarks
	///
	/// Exits with status 2 if a benchmark is not met.
	Benchmark {
		/// Directory holding the score report
		#[arg(long)]
		score_report_folder: PathBuf,

		/// Directory receiving the benchmark report
		#[arg(long)]
		benchmark_report_folder: PathBuf,
	},

	/// Predict the words following a short context
	Query {
		/// Directory holding the trained model and tokenizer
		#[arg(long, env = "SEQ_MODEL_ARTIFACTS")]
		model_artifacts: PathBuf,

		/// Number of predictions, defaults to the model's max top n
		#[arg(long)]
		top_n: Option<usize>,

		/// Context words, oldest first
		words: Vec<String>,
	},

	/// Predict the words following each line of a file
	///
	/// A line longer than the model's context gives no candidates.
	Batch {
		/// Directory holding the trained model and tokenizer
		#[arg(long, env = "SEQ_MODEL_ARTIFACTS")]
		model_artifacts: PathBuf,

		/// Text file with one context per line
		#[arg(long)]
		input: PathBuf,

		/// JSON file receiving the predictions, printed when absent
		#[arg(long)]
		output: Option<PathBuf>,

		/// Number of predictions, defaults to the model's max top n
		#[arg(long)]
		top_n: Option<usize>,
	},
}

/// Written next to the model so a trained artifact can be traced back.
#[derive(Serialize)]
struct ModelMetadata<'a> {
	training_data_path: &'a Path,
	max_prior_token_length: usize,
	max_top_n: usize,
	vocab_size: usize,
	token_count: usize,
}

/// Candidates predicted for one line of a batch input.
#[derive(Serialize, Debug, PartialEq)]
struct LinePrediction {
	context: Vec<String>,
	predictions: Vec<String>,
}

impl Commands {
	/// Runs the command and returns the process exit status.
	fn execute(self, config: Option<&Path>) -> anyhow::Result<i32> {
		use Commands::*;
		match self {
			Train { dataset, model_artifacts } => {
				let config = load_config(config)?;
				train(&config, &dataset, &ArtifactPaths::new(model_artifacts))?;
			}
			Predict { dataset, model_artifacts, predictions_folder } => {
				let config = load_config(config)?;
				predict(&config, &dataset, &ArtifactPaths::new(model_artifacts), &predictions_folder)?;
			}
			Score { predictions_folder, score_report_folder } => {
				let config = load_config(config)?;
				score(&config, &predictions_folder, &score_report_folder)?;
			}
			Benchmark { score_report_folder, benchmark_report_folder } => {
				let config = load_config(config)?;
				if !benchmark(&config, &score_report_folder, &benchmark_report_folder)? {
					return Ok(BENCHMARKS_NOT_MET);
				}
			}
			Query { model_artifacts, top_n, words } => query(&ArtifactPaths::new(model_artifacts), top_n, &words)?,
			Batch { model_artifacts, input, output, top_n } => {
				batch(&ArtifactPaths::new(model_artifacts), &input, output.as_deref(), top_n)?
			}
		}
		Ok(0)
	}
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
	let path = path.context("this command requires --config")?;
	PipelineConfig::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn train(config: &PipelineConfig, dataset: &Path, paths: &ArtifactPaths) -> anyhow::Result<()> {
	info!("Loading training data from {}", dataset.display());
	let corpus = io::read_corpus(dataset)?;

	info!("Training tokenizer");
	let mut tokenizer = Tokenizer::new();
	tokenizer.train_and_save(&corpus, paths.tokenizer())?;
	info!("Vocabulary size: {}", tokenizer.vocab_size());

	info!("Tokenizing data");
	let tokens = tokenizer.tokenize(&corpus);

	info!("Training model");
	let mut model = NgramModel::from_config(&config.model)?;
	model.count(&tokens);
	model.train()?;

	info!("Saving model");
	model.save(paths.model())?;
	io::write_json(
		paths.model_metadata(),
		&ModelMetadata {
			training_data_path: dataset,
			max_prior_token_length: model.max_prior_token_length(),
			max_top_n: model.max_top_n(),
			vocab_size: model.vocab_size(),
			token_count: model.token_count(),
		},
	)?;
	Ok(())
}

fn load_artifacts(paths: &ArtifactPaths) -> anyhow::Result<(Tokenizer, NgramModel)> {
	let tokenizer = Tokenizer::load(paths.tokenizer()).context("Failed to load tokenizer")?;
	let model = NgramModel::load(paths.model()).context("Failed to load model")?;
	Ok((tokenizer, model))
}

fn predict(config: &PipelineConfig, dataset: &Path, paths: &ArtifactPaths, predictions_folder: &Path) -> anyhow::Result<()> {
	let (tokenizer, model) = load_artifacts(paths)?;
	if model.max_prior_token_length() != config.model.max_prior_token_length {
		warn!(
			"Configured max_prior_token_length {} differs from the trained model's {}, using the model's",
			config.model.max_prior_token_length,
			model.max_prior_token_length()
		);
	}

	info!("Loading test data from {}", dataset.display());
	let corpus = io::read_corpus(dataset)?;
	let tokens = tokenizer.tokenize(&corpus);

	info!("Making predictions");
	let top_n = config.model.max_top_n.min(model.max_top_n());
	let matrix = predict_corpus(&model, &tokens, top_n)?;
	matrix.save(predictions_folder.join(PREDICTIONS_FILE))?;
	Ok(())
}

fn score(config: &PipelineConfig, predictions_folder: &Path, score_report_folder: &Path) -> anyhow::Result<()> {
	info!("Loading predictions");
	let matrix = PredictionMatrix::load(predictions_folder.join(PREDICTIONS_FILE))?;

	// The matrix holds at most the trained model's max_top_n ranks
	let num_preds = config.num_preds().min(matrix.top_n());
	if num_preds < config.num_preds() {
		warn!(
			"Scoring with num_preds {} instead of {}, the predictions hold only {} ranks",
			num_preds,
			config.num_preds(),
			matrix.top_n()
		);
	}
	let report = score_predictions(&matrix, num_preds)?;
	println!("Accuracy: {:.4}", report.accuracy);
	report.save(score_report_folder.join(SCORE_REPORT_FILE))?;
	Ok(())
}

fn benchmark(config: &PipelineConfig, score_report_folder: &Path, benchmark_report_folder: &Path) -> anyhow::Result<bool> {
	let report = ScoreReport::load(score_report_folder.join(SCORE_REPORT_FILE))?;
	let benchmark = run_benchmarks(&report, &config.benchmark.conditions);
	benchmark.save(benchmark_report_folder.join(BENCHMARK_REPORT_FILE))?;
	Ok(benchmark.benchmarks_met)
}

/// Encodes `context`, predicts and decodes the candidates.
///
/// A context longer than the model accepts yields no candidates; `predict`
/// has already logged it.
fn next_words(tokenizer: &Tokenizer, model: &NgramModel, context: &[String], top_n: usize) -> anyhow::Result<Vec<String>> {
	match model.predict(&tokenizer.enc(context), top_n) {
		Ok(prediction) => Ok(tokenizer.dec(&prediction).into_iter().map(str::to_owned).collect()),
		Err(SeqModelError::ContextTooLong { .. }) => Ok(Vec::new()),
		Err(e) => Err(e.into()),
	}
}

fn query(paths: &ArtifactPaths, top_n: Option<usize>, words: &[String]) -> anyhow::Result<()> {
	let (tokenizer, model) = load_artifacts(paths)?;
	let top_n = top_n.unwrap_or(model.max_top_n());

	let words = next_words(&tokenizer, &model, words, top_n)?;
	if words.is_empty() {
		println!("No prediction");
	}
	for (rank, word) in words.iter().enumerate() {
		println!("{}. {}", rank + 1, word);
	}
	Ok(())
}

fn predict_lines(
	tokenizer: &Tokenizer,
	model: &NgramModel,
	contexts: Vec<Vec<String>>,
	top_n: usize,
) -> anyhow::Result<Vec<LinePrediction>> {
	contexts
		.into_iter()
		.map(|context| {
			let predictions = next_words(tokenizer, model, &context, top_n)?;
			Ok(LinePrediction { context, predictions })
		})
		.collect()
}

fn batch(paths: &ArtifactPaths, input: &Path, output: Option<&Path>, top_n: Option<usize>) -> anyhow::Result<()> {
	let (tokenizer, model) = load_artifacts(paths)?;
	let top_n = top_n.unwrap_or(model.max_top_n());

	info!("Loading contexts from {}", input.display());
	let contexts = io::read_contexts(input)?;
	let lines = predict_lines(&tokenizer, &model, contexts, top_n)?;
	info!("{} has been processed, {} lines", input.display(), lines.len());

	match output {
		Some(output) => io::write_json(output, &lines)?,
		None => {
			for line in &lines {
				println!("Input data: {}", line.context.join(" "));
				println!("Possible choices for next word: {:?}", line.predictions);
			}
		}
	}
	Ok(())
}

fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let cli = Cli::parse();
	match cli.command.execute(cli.config.as_deref()) {
		Ok(0) => {}
		Ok(status) => exit(status),
		Err(e) => {
			eprintln!("Error: {e:#}");
			exit(1);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	use assert_matches::assert_matches;
	use tempfile::TempDir;

	const CORPUS: &str = "a b a b a c";

	fn write_config(dir: &TempDir, name: &str, json: &str) -> PathBuf {
		let path = dir.path().join(name);
		fs::write(&path, json).unwrap();
		path
	}

	fn write_corpus(dir: &TempDir, name: &str, text: &str) -> PathBuf {
		let path = dir.path().join(name);
		fs::write(&path, text).unwrap();
		path
	}

	fn train_artifacts(dir: &TempDir, config: &Path) -> PathBuf {
		let artifacts = dir.path().join("artifacts");
		let command = Commands::Train { dataset: write_corpus(dir, "train.txt", CORPUS), model_artifacts: artifacts.clone() };
		assert_eq!(command.execute(Some(config)).unwrap(), 0);
		artifacts
	}

	#[test]
	fn train_writes_model_metadata() {
		let dir = tempfile::tempdir().unwrap();
		let config = write_config(&dir, "config.json", r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 3 } }"#);
		let artifacts = train_artifacts(&dir, &config);

		let metadata: serde_json::Value =
			serde_json::from_slice(&fs::read(ArtifactPaths::new(&artifacts).model_metadata()).unwrap()).unwrap();
		assert_eq!(metadata["training_data_path"], dir.path().join("train.txt").to_str().unwrap());
		assert_eq!(metadata["max_prior_token_length"], 1);
		assert_eq!(metadata["max_top_n"], 3);
		assert_eq!(metadata["vocab_size"], 3);
		assert_eq!(metadata["token_count"], 6);
		assert!(ArtifactPaths::new(&artifacts).tokenizer().exists());
	}

	#[test]
	fn failed_benchmark_exits_with_status_two() {
		let dir = tempfile::tempdir().unwrap();
		let config = write_config(
			&dir,
			"config.json",
			r#"{
				"model": { "max_prior_token_length": 1, "max_top_n": 3 },
				"benchmark": { "conditions": [ { "metric": "accuracy", "condition": "<", "benchmark": 0.5 } ] }
			}"#,
		);
		let artifacts = train_artifacts(&dir, &config);
		let predictions = dir.path().join("predictions");
		let reports = dir.path().join("reports");

		let predict = Commands::Predict {
			dataset: write_corpus(&dir, "test.txt", "a b a c"),
			model_artifacts: artifacts,
			predictions_folder: predictions.clone(),
		};
		assert_eq!(predict.execute(Some(config.as_path())).unwrap(), 0);

		let score = Commands::Score { predictions_folder: predictions, score_report_folder: reports.clone() };
		assert_eq!(score.execute(Some(config.as_path())).unwrap(), 0);
		// Every context in "a b a c" was seen in training and the answer is in the top 3
		let report = ScoreReport::load(reports.join(SCORE_REPORT_FILE)).unwrap();
		assert_eq!((report.evaluated, report.correct, report.accuracy), (3, 3, 1.0));

		let benchmark = Commands::Benchmark { score_report_folder: reports.clone(), benchmark_report_folder: reports.clone() };
		assert_eq!(benchmark.execute(Some(config.as_path())).unwrap(), BENCHMARKS_NOT_MET);

		let outcome: serde_json::Value =
			serde_json::from_slice(&fs::read(reports.join(BENCHMARK_REPORT_FILE)).unwrap()).unwrap();
		assert_eq!(outcome["benchmarks_met"], false);
		assert_eq!(outcome["outcomes"][0]["met"], false);
	}

	#[test]
	fn met_benchmark_exits_with_status_zero() {
		let dir = tempfile::tempdir().unwrap();
		let config = write_config(
			&dir,
			"config.json",
			r#"{
				"model": { "max_prior_token_length": 1, "max_top_n": 3 },
				"benchmark": { "conditions": [ { "metric": "accuracy", "condition": ">=", "benchmark": 0.5 } ] }
			}"#,
		);
		fs::write(
			dir.path().join(SCORE_REPORT_FILE),
			serde_json::to_vec(&ScoreReport { accuracy: 0.5, num_preds: 3, max_top_n: 3, evaluated: 4, correct: 2 }).unwrap(),
		)
		.unwrap();

		let benchmark = Commands::Benchmark {
			score_report_folder: dir.path().to_path_buf(),
			benchmark_report_folder: dir.path().to_path_buf(),
		};
		assert_eq!(benchmark.execute(Some(config.as_path())).unwrap(), 0);
	}

	#[test]
	fn predict_and_score_follow_the_trained_model() {
		let dir = tempfile::tempdir().unwrap();
		let train_config = write_config(&dir, "train.json", r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 2 } }"#);
		let artifacts = train_artifacts(&dir, &train_config);

		// Wider than the trained model in both directions, and no num_preds
		let run_config = write_config(&dir, "run.json", r#"{ "model": { "max_prior_token_length": 3, "max_top_n": 4 } }"#);
		let predictions = dir.path().join("predictions");
		let predict = Commands::Predict {
			dataset: write_corpus(&dir, "test.txt", "a b a c"),
			model_artifacts: artifacts,
			predictions_folder: predictions.clone(),
		};
		assert_eq!(predict.execute(Some(run_config.as_path())).unwrap(), 0);

		let matrix = PredictionMatrix::load(predictions.join(PREDICTIONS_FILE)).unwrap();
		assert_eq!(matrix.top_n(), 2);
		assert_eq!(matrix.max_prior_token_length(), 1);

		let score = Commands::Score { predictions_folder: predictions, score_report_folder: dir.path().to_path_buf() };
		assert_eq!(score.execute(Some(run_config.as_path())).unwrap(), 0);
		let report = ScoreReport::load(dir.path().join(SCORE_REPORT_FILE)).unwrap();
		assert_eq!(report.num_preds, 2);
		assert_eq!(report.max_top_n, 2);
	}

	#[test]
	fn commands_needing_a_config_fail_without_one() {
		let dir = tempfile::tempdir().unwrap();
		let command = Commands::Train {
			dataset: write_corpus(&dir, "train.txt", CORPUS),
			model_artifacts: dir.path().join("artifacts"),
		};

		assert!(command.execute(None).is_err());
	}

	fn trained_model() -> (Tokenizer, NgramModel) {
		let corpus: Vec<&str> = CORPUS.split_whitespace().collect();
		let mut tokenizer = Tokenizer::new();
		tokenizer.train(&corpus).unwrap();
		let mut model = NgramModel::new(1, 3).unwrap();
		model.count(&tokenizer.tokenize(&corpus));
		model.train().unwrap();
		(tokenizer, model)
	}

	fn words(text: &str) -> Vec<String> {
		text.split_whitespace().map(str::to_owned).collect()
	}

	#[test]
	fn long_context_gives_no_words() {
		let (tokenizer, model) = trained_model();

		assert_eq!(next_words(&tokenizer, &model, &words("a"), 2).unwrap(), vec!["b", "c"]);
		assert!(next_words(&tokenizer, &model, &words("a b"), 2).unwrap().is_empty());
		assert_matches!(next_words(&tokenizer, &model, &words("a"), 4), Err(_));
	}

	#[test]
	fn batch_keeps_going_past_long_lines() {
		let (tokenizer, model) = trained_model();
		let contexts = vec![words("a"), words("b a c"), words("b")];

		let lines = predict_lines(&tokenizer, &model, contexts, 3).unwrap();
		assert_eq!(lines.len(), 3);
		assert_eq!(lines[0].predictions, vec!["b", "c"]);
		assert_eq!(lines[1].context, vec!["b", "a", "c"]);
		assert!(lines[1].predictions.is_empty());
		assert_eq!(lines[2].predictions, vec!["a"]);
	}

	#[test]
	fn batch_command_writes_one_entry_per_line() {
		let dir = tempfile::tempdir().unwrap();
		let config = write_config(&dir, "config.json", r#"{ "model": { "max_prior_token_length": 1, "max_top_n": 3 } }"#);
		let artifacts = train_artifacts(&dir, &config);
		let output = dir.path().join("batch.json");

		let command = Commands::Batch {
			model_artifacts: artifacts,
			input: write_corpus(&dir, "contexts.txt", "a\nb a c\n\nzzz\n"),
			output: Some(output.clone()),
			top_n: None,
		};
		assert_eq!(command.execute(None).unwrap(), 0);

		let lines: serde_json::Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
		assert_eq!(lines.as_array().unwrap().len(), 3);
		assert_eq!(lines[0]["predictions"], serde_json::json!(["b", "c"]));
		assert_eq!(lines[1]["predictions"], serde_json::json!([]));
		// The unknown id never opened a bigram
		assert_eq!(lines[2]["predictions"], serde_json::json!([]));
	}
}
