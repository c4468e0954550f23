use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqModelError};
use crate::io;

/// Dense integer id of a word token.
pub type TokenId = u32;

/// Literal marker for the end of a sequence. Always id 0.
pub const EOS_WORD: &str = "[EOS]";

/// Literal marker standing in for any word outside the vocabulary. Always id 1.
pub const UNK_WORD: &str = "[UNK]";

pub const EOS_ID: TokenId = 0;
pub const UNK_ID: TokenId = 1;

/// Bidirectional mapping between word tokens and dense integer ids.
///
/// # Responsibilities
/// - Learn a vocabulary from a corpus, in first-occurrence order
/// - Encode words to ids, mapping unknown words to the unknown marker
/// - Decode ids back to words
/// - Persist and restore the vocabulary as JSON
///
/// # Invariants
/// - Ids `0` and `1` are the end-of-sequence and unknown markers
/// - `id_to_word[id]` and `word_to_id[word]` are exact inverses
/// - Ids are dense: `0..vocab_size`
#[derive(Clone, Debug)]
pub struct Tokenizer {
	eos_word: String,
	unk_word: String,
	word_to_id: HashMap<String, TokenId>,
	id_to_word: Vec<String>,
}

/// Persisted form of a [`Tokenizer`].
///
/// Both mappings are stored so the file stays readable from other tools.
#[derive(Serialize, Deserialize)]
struct TokenizerSnapshot {
	vocab_size: usize,
	eos_word: String,
	unk_word: String,
	words_to_i: HashMap<String, TokenId>,
	i_to_words: BTreeMap<TokenId, String>,
}

impl Default for Tokenizer {
	fn default() -> Self {
		Self::new()
	}
}

impl Tokenizer {
	/// Creates an untrained tokenizer with the default reserved markers.
	pub fn new() -> Self {
		Self {
			eos_word: EOS_WORD.to_owned(),
			unk_word: UNK_WORD.to_owned(),
			word_to_id: HashMap::new(),
			id_to_word: Vec::new(),
		}
	}

	/// Learns the vocabulary of `corpus`.
	///
	/// Reserves ids `0` and `1` for the markers, then assigns the next id to
	/// every unseen word in first-occurrence order. Any previous vocabulary is
	/// discarded.
	///
	/// # Errors
	/// Returns [`SeqModelError::InvalidConfiguration`] if the vocabulary would
	/// outgrow the [`TokenId`] range.
	pub fn train<I, S>(&mut self, corpus: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.word_to_id.clear();
		self.id_to_word.clear();

		let eos_word = self.eos_word.clone();
		let unk_word = self.unk_word.clone();
		self.insert(&eos_word)?;
		self.insert(&unk_word)?;

		for word in corpus {
			let word = word.as_ref();
			if !self.word_to_id.contains_key(word) {
				self.insert(word)?;
			}
		}

		info!("Trained tokenizer, vocabulary size: {}", self.vocab_size());
		Ok(())
	}

	/// Trains on `corpus` then saves the vocabulary to `path`.
	pub fn train_and_save<I, S, P>(&mut self, corpus: I, path: P) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
		P: AsRef<Path>,
	{
		self.train(corpus)?;
		self.save(path)
	}

	fn insert(&mut self, word: &str) -> Result<()> {
		let id = next_id(self.id_to_word.len())?;
		self.word_to_id.insert(word.to_owned(), id);
		self.id_to_word.push(word.to_owned());
		Ok(())
	}

	/// Number of ids in the vocabulary, markers included.
	pub fn vocab_size(&self) -> usize {
		self.id_to_word.len()
	}

	pub fn eos_word(&self) -> &str {
		&self.eos_word
	}

	pub fn unk_word(&self) -> &str {
		&self.unk_word
	}

	/// Returns the id of `word`, or the unknown id if it is not in the vocabulary.
	pub fn id_of(&self, word: &str) -> TokenId {
		self.word_to_id.get(word).copied().unwrap_or(UNK_ID)
	}

	/// Returns the word for `id`, or the unknown marker if `id` is out of range.
	pub fn word_of(&self, id: TokenId) -> &str {
		self.id_to_word
			.get(id as usize)
			.map(String::as_str)
			.unwrap_or(self.unk_word.as_str())
	}

	/// Tokenizes a whole corpus.
	///
	/// The output has the same length as the input. The vocabulary is not
	/// modified, so repeated calls give identical results.
	pub fn tokenize<S: AsRef<str>>(&self, corpus: &[S]) -> Vec<TokenId> {
		let tokens: Vec<TokenId> = corpus.iter().map(|w| self.id_of(w.as_ref())).collect();
		debug!("Tokenized {} words", tokens.len());
		tokens
	}

	/// Encodes a short sequence of words, such as a prediction context.
	pub fn enc<S: AsRef<str>>(&self, words: &[S]) -> Vec<TokenId> {
		words.iter().map(|w| self.id_of(w.as_ref())).collect()
	}

	/// Decodes ids back into words.
	///
	/// Unknown ids decode to the unknown marker.
	pub fn dec(&self, tokens: &[TokenId]) -> Vec<&str> {
		tokens.iter().map(|&t| self.word_of(t)).collect()
	}

	/// Saves the vocabulary as pretty-printed JSON.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let snapshot = TokenizerSnapshot {
			vocab_size: self.vocab_size(),
			eos_word: self.eos_word.clone(),
			unk_word: self.unk_word.clone(),
			words_to_i: self.word_to_id.clone(),
			i_to_words: self
				.id_to_word
				.iter()
				.enumerate()
				.map(|(id, word)| (id as TokenId, word.clone()))
				.collect(),
		};
		io::write_json(&path, &snapshot)?;
		info!("Saved tokenizer to {}", path.as_ref().display());
		Ok(())
	}

	/// Loads a vocabulary written by [`Tokenizer::save`].
	///
	/// # Errors
	/// Returns [`SeqModelError::CorruptState`] if the file does not decode or
	/// if the two mappings, the size and the reserved markers disagree.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let snapshot: TokenizerSnapshot = io::read_json(path)?;
		let tokenizer = Self::from_snapshot(snapshot).map_err(|reason| SeqModelError::corrupt(path, reason))?;
		info!("Loaded tokenizer from {}, vocabulary size: {}", path.display(), tokenizer.vocab_size());
		Ok(tokenizer)
	}

	fn from_snapshot(snapshot: TokenizerSnapshot) -> std::result::Result<Self, String> {
		let TokenizerSnapshot { vocab_size, eos_word, unk_word, words_to_i, i_to_words } = snapshot;

		if words_to_i.len() != vocab_size || i_to_words.len() != vocab_size {
			return Err(format!(
				"vocab_size is {vocab_size} but mappings hold {} words and {} ids",
				words_to_i.len(),
				i_to_words.len()
			));
		}

		// BTreeMap iterates in id order, so density is checked by position
		let mut id_to_word = Vec::with_capacity(vocab_size);
		for (expected, (id, word)) in i_to_words.into_iter().enumerate() {
			if id as usize != expected {
				return Err(format!("ids are not dense, expected {expected} but found {id}"));
			}
			if words_to_i.get(&word) != Some(&id) {
				return Err(format!("word '{word}' does not map back to id {id}"));
			}
			id_to_word.push(word);
		}

		if id_to_word.get(EOS_ID as usize) != Some(&eos_word) || id_to_word.get(UNK_ID as usize) != Some(&unk_word) {
			return Err("reserved markers are not at ids 0 and 1".to_owned());
		}

		Ok(Self { eos_word, unk_word, word_to_id: words_to_i, id_to_word })
	}
}

/// Ids are dense, so the next id is the current vocabulary length.
fn next_id(vocab_size: usize) -> Result<TokenId> {
	TokenId::try_from(vocab_size).map_err(|_| {
		SeqModelError::InvalidConfiguration(format!("vocabulary cannot hold more than {} words", TokenId::MAX as u64 + 1))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;
	use std::fs;

	fn trained(corpus: &[&str]) -> Tokenizer {
		let mut tokenizer = Tokenizer::new();
		tokenizer.train(corpus).unwrap();
		tokenizer
	}

	#[test]
	fn reserves_markers_before_corpus_words() {
		let tokenizer = trained(&["hello", "world"]);

		assert_eq!(tokenizer.id_of(EOS_WORD), EOS_ID);
		assert_eq!(tokenizer.id_of(UNK_WORD), UNK_ID);
		assert_eq!(tokenizer.id_of("hello"), 2);
		assert_eq!(tokenizer.id_of("world"), 3);
		assert_eq!(tokenizer.vocab_size(), 4);
	}

	#[test]
	fn assigns_ids_in_first_occurrence_order() {
		let tokenizer = trained(&["b", "a", "b", "c", "a"]);

		assert_eq!(tokenizer.enc(&["b", "a", "c"]), vec![2, 3, 4]);
		assert_eq!(tokenizer.vocab_size(), 5);
	}

	#[test]
	fn tokenize_maps_unknown_words_to_unknown_id() {
		let tokenizer = trained(&["a", "b"]);

		let tokens = tokenizer.tokenize(&["a", "zzz", "b"]);
		assert_eq!(tokens, vec![2, UNK_ID, 3]);
		// No internal cursor: a second pass gives the same result
		assert_eq!(tokenizer.tokenize(&["a", "zzz", "b"]), tokens);
		assert_eq!(tokenizer.vocab_size(), 4);
	}

	#[test]
	fn known_words_round_trip() {
		let tokenizer = trained(&["the", "cat", "sat", "on", "the", "mat"]);
		let words = ["mat", "the", "cat", "the"];

		assert_eq!(tokenizer.dec(&tokenizer.enc(&words)), words);
	}

	#[test]
	fn unknown_words_decode_to_unknown_marker() {
		let tokenizer = trained(&["a", "b"]);

		assert_eq!(tokenizer.dec(&tokenizer.enc(&["a", "nope"])), vec!["a", UNK_WORD]);
	}

	#[test]
	fn out_of_range_ids_decode_to_unknown_marker() {
		let tokenizer = trained(&["a"]);

		assert_eq!(tokenizer.dec(&[2, 99]), vec!["a", UNK_WORD]);
	}

	#[test]
	fn retraining_discards_previous_vocabulary() {
		let mut tokenizer = trained(&["x", "y"]);
		tokenizer.train(["y"]).unwrap();

		assert_eq!(tokenizer.vocab_size(), 3);
		assert_eq!(tokenizer.id_of("x"), UNK_ID);
		assert_eq!(tokenizer.id_of("y"), 2);
	}

	#[test]
	fn save_then_load_behaves_identically() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer").join("tokenizer.json");
		let tokenizer = trained(&["über", "straße", "a", "über"]);
		tokenizer.save(&path).unwrap();

		let loaded = Tokenizer::load(&path).unwrap();
		let words = ["a", "straße", "missing", "über"];
		assert_eq!(loaded.vocab_size(), tokenizer.vocab_size());
		assert_eq!(loaded.enc(&words), tokenizer.enc(&words));
		assert_eq!(loaded.dec(&[0, 1, 2, 3, 4, 5]), tokenizer.dec(&[0, 1, 2, 3, 4, 5]));
	}

	#[test]
	fn train_and_save_writes_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		let mut tokenizer = Tokenizer::new();
		tokenizer.train_and_save(["a", "b"], &path).unwrap();

		let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
		assert_eq!(json["vocab_size"], 4);
		assert_eq!(json["eos_word"], EOS_WORD);
		assert_eq!(json["unk_word"], UNK_WORD);
		assert_eq!(json["words_to_i"]["b"], 3);
		assert_eq!(json["i_to_words"]["2"], "a");
	}

	#[test]
	fn load_rejects_inconsistent_mappings() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		fs::write(
			&path,
			r#"{
				"vocab_size": 3,
				"eos_word": "[EOS]",
				"unk_word": "[UNK]",
				"words_to_i": { "[EOS]": 0, "[UNK]": 1, "a": 2 },
				"i_to_words": { "0": "[EOS]", "1": "[UNK]", "2": "b" }
			}"#,
		)
		.unwrap();

		assert_matches!(Tokenizer::load(&path), Err(SeqModelError::CorruptState { .. }));
	}

	#[test]
	fn load_rejects_wrong_vocab_size() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		fs::write(
			&path,
			r#"{
				"vocab_size": 5,
				"eos_word": "[EOS]",
				"unk_word": "[UNK]",
				"words_to_i": { "[EOS]": 0, "[UNK]": 1 },
				"i_to_words": { "0": "[EOS]", "1": "[UNK]" }
			}"#,
		)
		.unwrap();

		assert_matches!(Tokenizer::load(&path), Err(SeqModelError::CorruptState { .. }));
	}

	#[test]
	fn load_rejects_swapped_markers() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		fs::write(
			&path,
			r#"{
				"vocab_size": 3,
				"eos_word": "[EOS]",
				"unk_word": "[UNK]",
				"words_to_i": { "[UNK]": 0, "[EOS]": 1, "a": 2 },
				"i_to_words": { "0": "[UNK]", "1": "[EOS]", "2": "a" }
			}"#,
		)
		.unwrap();

		assert_matches!(
			Tokenizer::load(&path),
			Err(SeqModelError::CorruptState { reason, .. }) if reason.contains("reserved markers")
		);
	}

	#[test]
	fn next_id_stops_at_token_id_range() {
		assert_eq!(next_id(0).unwrap(), 0);
		assert_eq!(next_id(TokenId::MAX as usize).unwrap(), TokenId::MAX);
		#[cfg(target_pointer_width = "64")]
		assert_matches!(next_id(TokenId::MAX as usize + 1), Err(SeqModelError::InvalidConfiguration(_)));
	}

	#[test]
	fn load_rejects_truncated_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		fs::write(&path, r#"{ "vocab_size": 2, "eos_word": "#).unwrap();

		assert_matches!(Tokenizer::load(&path), Err(SeqModelError::CorruptState { .. }));
	}
}
