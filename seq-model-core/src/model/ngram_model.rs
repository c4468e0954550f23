use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::lookup_table::{LookupTable, Ngram, ScoredNgram};
use crate::config::ModelConfig;
use crate::error::{Result, SeqModelError};
use crate::io;
use crate::tokenizer::TokenId;

/// Version written into every model snapshot. Bumped on layout changes.
const FORMAT_VERSION: u32 = 1;

/// Lifecycle of a model: `count` then `train`, or `load`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ModelState {
	Uninitialized,
	Counted,
	Trained,
}

/// Occurrences of one n-gram, plus the order in which it was first met.
#[derive(Clone, Copy, Debug)]
struct NgramCount {
	count: usize,
	first_seen: usize,
}

/// A word-level n-gram model predicting the most likely next tokens.
///
/// The model counts every n-gram of length `1..=max_ngram_length` in a
/// tokenized corpus, turns the counts into conditional probabilities and
/// precomputes, per n-gram length, the `max_top_n` best next tokens for
/// each observed prefix.
///
/// # Responsibilities
/// - Count n-grams of every length (`count`)
/// - Compute probabilities and lookup tables (`train`)
/// - Predict ranked next tokens with backoff to shorter contexts (`predict`)
/// - Persist and restore the inference state (`save` / `load`)
///
/// # Invariants
/// - `max_ngram_length == max_prior_token_length + 1`
/// - The prefix of every counted n-gram is counted too
/// - No smoothing: unseen n-grams have no probability at all
///
/// Once trained or loaded the model is never mutated by prediction and can
/// be shared between threads.
#[derive(Clone, Debug)]
pub struct NgramModel {
	max_prior_token_length: usize,
	max_ngram_length: usize,
	max_top_n: usize,
	state: ModelState,

	// Training-only state, not persisted
	counts: HashMap<Ngram, NgramCount>,
	token_count: usize,

	vocab_size: usize,
	uniform_prob: Option<f64>,
	probs: HashMap<Ngram, f64>,
	lookup_tables: BTreeMap<usize, LookupTable>,
}

/// Everything inference needs, stored as a single postcard blob.
#[derive(Serialize, Deserialize)]
struct ModelSnapshot {
	format_version: u32,
	max_prior_token_length: usize,
	max_ngram_length: usize,
	probs: HashMap<Ngram, f64>,
	lookup_tables: BTreeMap<usize, LookupTable>,
	vocab_size: usize,
	max_top_n: usize,
}

impl NgramModel {
	/// Creates an empty model considering up to `max_prior_token_length`
	/// prior tokens and ranking up to `max_top_n` candidates.
	///
	/// # Errors
	/// Returns an error if `max_top_n` is 0.
	pub fn new(max_prior_token_length: usize, max_top_n: usize) -> Result<Self> {
		if max_top_n == 0 {
			return Err(SeqModelError::InvalidConfiguration("max_top_n must be >= 1".to_owned()));
		}
		Ok(Self {
			max_prior_token_length,
			max_ngram_length: max_prior_token_length + 1,
			max_top_n,
			state: ModelState::Uninitialized,
			counts: HashMap::new(),
			token_count: 0,
			vocab_size: 0,
			uniform_prob: None,
			probs: HashMap::new(),
			lookup_tables: BTreeMap::new(),
		})
	}

	/// Creates an empty model from the `model` section of a pipeline config.
	pub fn from_config(config: &ModelConfig) -> Result<Self> {
		Self::new(config.max_prior_token_length, config.max_top_n)
	}

	/// Counts every n-gram of length `1..=max_ngram_length` in `corpus`.
	///
	/// Slides a window of each length over the corpus; a corpus shorter
	/// than a window contributes no n-gram of that length. Any previous
	/// counts, probabilities and tables are discarded.
	pub fn count(&mut self, corpus: &[TokenId]) {
		self.counts.clear();
		self.probs.clear();
		self.lookup_tables.clear();
		self.token_count = corpus.len();

		for ngram_length in 1..=self.max_ngram_length {
			for window in corpus.windows(ngram_length) {
				if let Some(entry) = self.counts.get_mut(window) {
					entry.count += 1;
				} else {
					let first_seen = self.counts.len();
					self.counts.insert(window.to_vec(), NgramCount { count: 1, first_seen });
				}
			}
		}

		self.vocab_size = self.counts.keys().filter(|ngram| ngram.len() == 1).count();
		self.uniform_prob = (self.vocab_size > 0).then(|| 1.0 / self.vocab_size as f64);
		self.state = ModelState::Counted;

		debug!(
			"Counted {} distinct n-grams over {} tokens ({} distinct unigrams)",
			self.counts.len(),
			self.token_count,
			self.vocab_size
		);
	}

	/// Computes conditional probabilities and builds the lookup tables.
	///
	/// - Unigram: `count / token_count`
	/// - Longer n-gram: `count(ngram) / count(prefix)`
	///
	/// # Errors
	/// Returns an error if `count` has not been called first.
	pub fn train(&mut self) -> Result<()> {
		if self.state != ModelState::Counted {
			return Err(SeqModelError::InvalidState("train requires counted n-grams, call count first".to_owned()));
		}

		let mut probs = HashMap::with_capacity(self.counts.len());
		for (ngram, entry) in &self.counts {
			let denominator = if ngram.len() == 1 {
				self.token_count
			} else {
				match self.counts.get(&ngram[..ngram.len() - 1]) {
					Some(prefix) => prefix.count,
					None => return Err(SeqModelError::InvalidState(format!("prefix of {ngram:?} was never counted"))),
				}
			};
			probs.insert(ngram.clone(), entry.count as f64 / denominator as f64);
		}
		self.probs = probs;

		// Bucket the n-grams by length once, then build each table
		let mut by_length: Vec<Vec<ScoredNgram<'_>>> = (0..self.max_ngram_length).map(|_| Vec::new()).collect();
		for (ngram, entry) in &self.counts {
			by_length[ngram.len() - 1].push(ScoredNgram {
				ngram,
				prob: self.probs[ngram],
				first_seen: entry.first_seen,
			});
		}

		let mut lookup_tables = BTreeMap::new();
		for (index, scored) in by_length.into_iter().enumerate() {
			let ngram_length = index + 1;
			let table = LookupTable::build(ngram_length, scored, self.max_top_n);
			debug!("Lookup table for {}-grams holds {} prefixes", ngram_length, table.len());
			lookup_tables.insert(ngram_length, table);
		}
		self.lookup_tables = lookup_tables;
		self.state = ModelState::Trained;

		info!("Trained model on {} tokens, {} n-grams", self.token_count, self.probs.len());
		Ok(())
	}

	/// Predicts up to `top_n` next tokens, most likely first.
	///
	/// - An empty context returns the most frequent unigrams.
	/// - Otherwise the table for `len(context) + 1`-grams is consulted. When
	///   the exact context was never observed, its oldest token is dropped
	///   and the lookup retried, down to a single token. If even that is
	///   unseen the prediction is empty.
	///
	/// # Errors
	/// - [`SeqModelError::ContextTooLong`] if `prior_tokens` holds
	///   `max_ngram_length` tokens or more.
	/// - [`SeqModelError::InvalidConfiguration`] if `top_n > max_top_n`.
	/// - [`SeqModelError::InvalidState`] if the model is neither trained nor loaded.
	pub fn predict(&self, prior_tokens: &[TokenId], top_n: usize) -> Result<Vec<TokenId>> {
		if self.state != ModelState::Trained {
			return Err(SeqModelError::InvalidState("predict requires a trained or loaded model".to_owned()));
		}
		if top_n > self.max_top_n {
			return Err(SeqModelError::InvalidConfiguration(format!(
				"top_n {top_n} exceeds max_top_n {}",
				self.max_top_n
			)));
		}
		if prior_tokens.len() >= self.max_ngram_length {
			warn!(
				"Context too long ({} tokens), should be less than the max n-gram length {}",
				prior_tokens.len(),
				self.max_ngram_length
			);
			return Err(SeqModelError::ContextTooLong {
				context_length: prior_tokens.len(),
				max_ngram_length: self.max_ngram_length,
			});
		}

		if prior_tokens.is_empty() {
			return Ok(self.ranked(prior_tokens, top_n).unwrap_or_default());
		}

		let mut context = prior_tokens;
		while !context.is_empty() {
			if let Some(tokens) = self.ranked(context, top_n) {
				return Ok(tokens);
			}
			trace!("Context {:?} unseen, backing off", context);
			context = &context[1..];
		}
		Ok(Vec::new())
	}

	/// Looks `context` up in the table for `len(context) + 1`-grams.
	fn ranked(&self, context: &[TokenId], top_n: usize) -> Option<Vec<TokenId>> {
		let candidates = self.lookup_tables.get(&(context.len() + 1))?.candidates(context)?;
		Some(candidates.iter().take(top_n).copied().collect())
	}

	pub fn max_prior_token_length(&self) -> usize {
		self.max_prior_token_length
	}

	pub fn max_ngram_length(&self) -> usize {
		self.max_ngram_length
	}

	pub fn max_top_n(&self) -> usize {
		self.max_top_n
	}

	/// Number of distinct unigrams seen during counting.
	pub fn vocab_size(&self) -> usize {
		self.vocab_size
	}

	/// Number of tokens in the counted corpus. Zero after `load`.
	pub fn token_count(&self) -> usize {
		self.token_count
	}

	/// `1 / vocab_size`, kept as a fallback probability.
	pub fn uniform_prob(&self) -> Option<f64> {
		self.uniform_prob
	}

	/// Returns true once the model can serve predictions.
	pub fn is_trained(&self) -> bool {
		self.state == ModelState::Trained
	}

	/// Occurrences of `ngram` in the counted corpus, 0 if never seen.
	pub fn count_of(&self, ngram: &[TokenId]) -> usize {
		self.counts.get(ngram).map_or(0, |entry| entry.count)
	}

	/// Iterates over every counted n-gram with its count, in arbitrary order.
	pub fn counts(&self) -> impl Iterator<Item = (&[TokenId], usize)> {
		self.counts.iter().map(|(ngram, entry)| (ngram.as_slice(), entry.count))
	}

	/// Conditional probability of `ngram`, `None` if never observed.
	pub fn prob(&self, ngram: &[TokenId]) -> Option<f64> {
		self.probs.get(ngram).copied()
	}

	/// Iterates over every n-gram with its probability, in arbitrary order.
	pub fn probs(&self) -> impl Iterator<Item = (&[TokenId], f64)> {
		self.probs.iter().map(|(ngram, prob)| (ngram.as_slice(), *prob))
	}

	/// The lookup table for n-grams of `ngram_length` tokens.
	pub fn lookup_table(&self, ngram_length: usize) -> Option<&LookupTable> {
		self.lookup_tables.get(&ngram_length)
	}

	/// Saves the inference state as one postcard snapshot, written atomically.
	///
	/// Counts are training-only and are not saved.
	///
	/// # Errors
	/// Returns an error if the model is not trained, or on I/O failure.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		if self.state != ModelState::Trained {
			return Err(SeqModelError::InvalidState("only a trained model can be saved".to_owned()));
		}

		let snapshot = ModelSnapshot {
			format_version: FORMAT_VERSION,
			max_prior_token_length: self.max_prior_token_length,
			max_ngram_length: self.max_ngram_length,
			probs: self.probs.clone(),
			lookup_tables: self.lookup_tables.clone(),
			vocab_size: self.vocab_size,
			max_top_n: self.max_top_n,
		};
		let bytes = postcard::to_stdvec(&snapshot)?;
		io::write_atomic(&path, &bytes)?;

		info!("Saved model to {} ({} bytes)", path.as_ref().display(), bytes.len());
		Ok(())
	}

	/// Loads a model saved by [`NgramModel::save`], ready for prediction.
	///
	/// # Errors
	/// Returns [`SeqModelError::CorruptState`] if the snapshot does not
	/// decode, has another format version, or breaks a structural invariant.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let bytes = io::read_bytes(path)?;
		let snapshot: ModelSnapshot =
			postcard::from_bytes(&bytes).map_err(|e| SeqModelError::corrupt(path, e.to_string()))?;
		let model = Self::from_snapshot(snapshot).map_err(|reason| SeqModelError::corrupt(path, reason))?;

		info!(
			"Loaded model from {} (max n-gram length {}, max top n {})",
			path.display(),
			model.max_ngram_length,
			model.max_top_n
		);
		Ok(model)
	}

	fn from_snapshot(snapshot: ModelSnapshot) -> std::result::Result<Self, String> {
		if snapshot.format_version != FORMAT_VERSION {
			return Err(format!(
				"format version {} is not supported, expected {FORMAT_VERSION}",
				snapshot.format_version
			));
		}
		if snapshot.max_ngram_length != snapshot.max_prior_token_length + 1 {
			return Err(format!(
				"max_ngram_length {} does not match max_prior_token_length {}",
				snapshot.max_ngram_length, snapshot.max_prior_token_length
			));
		}
		if snapshot.max_top_n == 0 {
			return Err("max_top_n is 0".to_owned());
		}
		if let Some((ngram, prob)) = snapshot.probs.iter().find(|(_, p)| !(0.0..=1.0).contains(*p)) {
			return Err(format!("probability {prob} of {ngram:?} is outside [0, 1]"));
		}

		let expected: Vec<usize> = (1..=snapshot.max_ngram_length).collect();
		let found: Vec<usize> = snapshot.lookup_tables.keys().copied().collect();
		if expected != found {
			return Err(format!("lookup tables cover n-gram lengths {found:?}, expected {expected:?}"));
		}
		for (ngram_length, table) in &snapshot.lookup_tables {
			if table.ngram_length() != *ngram_length {
				return Err(format!("table stored under length {ngram_length} holds {}-grams", table.ngram_length()));
			}
			table.validate(snapshot.max_top_n)?;
			for (prefix, candidates) in table.iter() {
				for candidate in candidates {
					let mut ngram = prefix.to_vec();
					ngram.push(*candidate);
					if !snapshot.probs.contains_key(&ngram) {
						return Err(format!("candidate n-gram {ngram:?} has no probability"));
					}
				}
			}
		}

		Ok(Self {
			max_prior_token_length: snapshot.max_prior_token_length,
			max_ngram_length: snapshot.max_ngram_length,
			max_top_n: snapshot.max_top_n,
			state: ModelState::Trained,
			counts: HashMap::new(),
			token_count: 0,
			vocab_size: snapshot.vocab_size,
			uniform_prob: (snapshot.vocab_size > 0).then(|| 1.0 / snapshot.vocab_size as f64),
			probs: snapshot.probs,
			lookup_tables: snapshot.lookup_tables,
		})
	}
}
