use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tokenizer::TokenId;

/// An ordered tuple of consecutive token ids.
pub type Ngram = Vec<TokenId>;

/// One scored n-gram, as fed to [`LookupTable::build`].
///
/// `first_seen` is the rank of the n-gram's first occurrence during counting
/// and breaks ties between equal probabilities.
pub(crate) struct ScoredNgram<'a> {
	pub ngram: &'a [TokenId],
	pub prob: f64,
	pub first_seen: usize,
}

/// Top-N prediction index for a single n-gram length.
///
/// Maps each observed prefix of length `ngram_length - 1` (the empty prefix
/// for unigrams) to the most probable next tokens, best first.
///
/// # Invariants
/// - Every prefix has exactly `ngram_length - 1` tokens
/// - Every candidate list is non-empty and at most `max_top_n` long
/// - Candidates are sorted by non-increasing probability, ties by first occurrence
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LookupTable {
	ngram_length: usize,
	candidates: HashMap<Ngram, Vec<TokenId>>,
}

impl LookupTable {
	/// Creates an empty table for n-grams of `ngram_length` tokens.
	pub fn new(ngram_length: usize) -> Self {
		Self { ngram_length, candidates: HashMap::new() }
	}

	/// Builds the table from every n-gram of this length.
	///
	/// N-grams are ranked globally by descending probability (ties by first
	/// occurrence) and then dealt to their prefix, so each prefix receives its
	/// candidates already in order and keeps only the first `max_top_n`.
	pub(crate) fn build(ngram_length: usize, mut scored: Vec<ScoredNgram<'_>>, max_top_n: usize) -> Self {
		scored.sort_by(|a, b| match b.prob.total_cmp(&a.prob) {
			Ordering::Equal => a.first_seen.cmp(&b.first_seen),
			other => other,
		});

		let mut table = Self::new(ngram_length);
		for entry in scored {
			debug_assert_eq!(entry.ngram.len(), ngram_length);
			let (prefix, last) = entry.ngram.split_at(ngram_length - 1);
			let list = table.candidates.entry(prefix.to_vec()).or_default();
			if list.len() < max_top_n {
				list.push(last[0]);
			}
		}
		table
	}

	pub fn ngram_length(&self) -> usize {
		self.ngram_length
	}

	/// Returns the ranked next tokens for `prefix`, if the prefix was observed.
	pub fn candidates(&self, prefix: &[TokenId]) -> Option<&[TokenId]> {
		self.candidates.get(prefix).map(Vec::as_slice)
	}

	/// Number of distinct prefixes.
	pub fn len(&self) -> usize {
		self.candidates.len()
	}

	pub fn is_empty(&self) -> bool {
		self.candidates.is_empty()
	}

	/// Iterates over `(prefix, ranked candidates)` pairs in arbitrary order.
	pub fn iter(&self) -> impl Iterator<Item = (&[TokenId], &[TokenId])> {
		self.candidates.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
	}

	/// Checks the structural invariants of a table read back from disk.
	pub(crate) fn validate(&self, max_top_n: usize) -> Result<(), String> {
		for (prefix, list) in &self.candidates {
			if prefix.len() + 1 != self.ngram_length {
				return Err(format!(
					"prefix {prefix:?} does not belong in the table for {}-grams",
					self.ngram_length
				));
			}
			if list.is_empty() || list.len() > max_top_n {
				return Err(format!(
					"prefix {prefix:?} has {} candidates, expected 1..={max_top_n}",
					list.len()
				));
			}
		}
		Ok(())
	}
}
