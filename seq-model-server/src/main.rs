use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};

use seq_model_core::io::ArtifactPaths;
use seq_model_core::{NgramModel, SeqModelError, Tokenizer};

#[derive(Parser)]
#[command(author, version, about = "Serve next-word predictions over HTTP", long_about = None)]
struct Cli {
	/// Directory holding the trained model and tokenizer
	#[arg(long, env = "SEQ_MODEL_ARTIFACTS")]
	model_artifacts: PathBuf,

	#[arg(long, env = "SEQ_MODEL_HOST", default_value = "127.0.0.1")]
	host: String,

	#[arg(long, env = "SEQ_MODEL_PORT", default_value_t = 5000)]
	port: u16,
}

/// Body of `POST /v1/predict`.
#[derive(Deserialize)]
struct PredictRequest {
	/// Context words, oldest first
	data: Vec<String>,
	/// Defaults to the model's max top n
	top_n: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ModelInfo {
	max_prior_token_length: usize,
	max_top_n: usize,
	vocab_size: usize,
}

/// Model and tokenizer, loaded once and only read afterwards.
///
/// Prediction never mutates either, so the handlers share them without a lock.
struct SharedData {
	tokenizer: Tokenizer,
	model: NgramModel,
}

impl SharedData {
	fn load(paths: &ArtifactPaths) -> Result<Self, SeqModelError> {
		Ok(Self {
			tokenizer: Tokenizer::load(paths.tokenizer())?,
			model: NgramModel::load(paths.model())?,
		})
	}

	/// Encodes the context, predicts, and decodes the result.
	///
	/// Returns the message for a 400 response if the request is out of bounds.
	fn predict(&self, request: &PredictRequest) -> Result<Vec<String>, String> {
		let max_prior = self.model.max_prior_token_length();
		if request.data.len() > max_prior {
			return Err(format!(
				"Only {max_prior} prior words can be used for the next prediction but {} words exist in the request",
				request.data.len()
			));
		}
		let top_n = request.top_n.unwrap_or(self.model.max_top_n());

		let tokens = self.tokenizer.enc(&request.data);
		match self.model.predict(&tokens, top_n) {
			Ok(prediction) => Ok(self.tokenizer.dec(&prediction).into_iter().map(str::to_owned).collect()),
			Err(e) => Err(e.to_string()),
		}
	}
}

/// HTTP POST endpoint `/v1/predict`
///
/// Returns the decoded next-word candidates as a JSON list, best first.
#[post("/v1/predict")]
async fn post_predict(data: web::Data<SharedData>, request: web::Json<PredictRequest>) -> impl Responder {
	info!("Request received with {} context words", request.data.len());
	match data.predict(&request) {
		Ok(words) => HttpResponse::Ok().json(words),
		Err(e) => HttpResponse::BadRequest().body(e),
	}
}

#[get("/v1/model")]
async fn get_model(data: web::Data<SharedData>) -> impl Responder {
	HttpResponse::Ok().json(ModelInfo {
		max_prior_token_length: data.model.max_prior_token_length(),
		max_top_n: data.model.max_top_n(),
		vocab_size: data.tokenizer.vocab_size(),
	})
}

/// Main entry point for the server.
///
/// Loads the model artifacts once, then serves them from every worker.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();

	let shared_data = SharedData::load(&ArtifactPaths::new(&cli.model_artifacts))
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
	let shared_data = web::Data::new(shared_data);
	info!("Init complete, listening on {}:{}", cli.host, cli.port);

	HttpServer::new(move || {
		App::new()
			.wrap(Cors::default().allow_any_origin().allowed_methods(vec!["GET", "POST"]))
			.app_data(shared_data.clone())
			.service(post_predict)
			.service(get_model)
	})
		.bind((cli.host.as_str(), cli.port))?
		.run()
		.await
}
