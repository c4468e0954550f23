use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{Result, SeqModelError};

/// Reads a text corpus and returns its word tokens.
///
/// - Reads the entire file into memory
/// - Splits on any whitespace, line breaks included
pub fn read_corpus<P: AsRef<Path>>(filename: P) -> Result<Vec<String>> {
	let path = filename.as_ref();
	let contents = fs::read_to_string(path).map_err(|e| SeqModelError::io(path, e))?;
	Ok(contents.split_whitespace().map(str::to_owned).collect())
}

/// Reads one prediction context per line.
///
/// Each line is split on whitespace; blank lines are skipped.
pub fn read_contexts<P: AsRef<Path>>(filename: P) -> Result<Vec<Vec<String>>> {
	let path = filename.as_ref();
	let contents = fs::read_to_string(path).map_err(|e| SeqModelError::io(path, e))?;
	Ok(contents
		.lines()
		.map(|line| line.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
		.filter(|words| !words.is_empty())
		.collect())
}

/// Writes `bytes` to `path` so that readers never observe a partial file.
///
/// The data goes to a temporary file in the destination directory, which is
/// then renamed over `path`. Missing parent directories are created.
pub fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
	let path = path.as_ref();
	let parent = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new("."),
	};
	fs::create_dir_all(parent).map_err(|e| SeqModelError::io(parent, e))?;

	let mut temp_file = NamedTempFile::new_in(parent).map_err(|e| SeqModelError::io(parent, e))?;
	temp_file.write_all(bytes).map_err(|e| SeqModelError::io(path, e))?;
	temp_file.flush().map_err(|e| SeqModelError::io(path, e))?;
	temp_file.persist(path).map_err(|e| SeqModelError::io(path, e.error))?;
	Ok(())
}

/// Reads a whole file into memory.
pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
	let path = path.as_ref();
	fs::read(path).map_err(|e| SeqModelError::io(path, e))
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
	let json = serde_json::to_vec_pretty(value)?;
	write_atomic(path, &json)
}

/// Reads a JSON document written by [`write_json`].
///
/// A document that does not decode is reported as [`SeqModelError::CorruptState`].
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T> {
	let path = path.as_ref();
	let bytes = read_bytes(path)?;
	serde_json::from_slice(&bytes).map_err(|e| SeqModelError::corrupt(path, e.to_string()))
}

/// On-disk layout of a trained model and its tokenizer.
///
/// Example, for the root `artifacts`:
/// - `artifacts/model/model.bin`
/// - `artifacts/model/model_metadata.json`
/// - `artifacts/tokenizer/tokenizer.json`
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
	root: PathBuf,
}

impl ArtifactPaths {
	pub fn new<P: AsRef<Path>>(root: P) -> Self {
		Self { root: root.as_ref().to_path_buf() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn model(&self) -> PathBuf {
		self.root.join("model").join("model.bin")
	}

	pub fn model_metadata(&self) -> PathBuf {
		self.root.join("model").join("model_metadata.json")
	}

	pub fn tokenizer(&self) -> PathBuf {
		self.root.join("tokenizer").join("tokenizer.json")
	}
}
