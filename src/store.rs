//! Persistence of learned exams, keyed by URL fingerprint.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::Mutex,
};

use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre::eyre};
use serde::{Deserialize, Serialize};
#[cfg(feature = "xdg")]
use v_utils::xdg_state_dir;

use crate::{LearnedExam, error::EngineError};

const EXAM_KEY_PREFIX: &str = "exam_learned_";
const STATS_KEY: &str = "exam_stats";

/// Minimal byte-oriented key/value backend.
///
/// `delete` accepts an exact key or a prefix pattern ending in `*`.
pub trait KvStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
	fn put(&self, key: &str, value: &[u8]) -> Result<()>;
	fn delete(&self, pattern: &str) -> Result<()>;
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
	match pattern.strip_suffix('*') {
		Some(prefix) => key.starts_with(prefix),
		None => key == pattern,
	}
}

/// In-process store. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
	entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KvStore for MemoryKv {
	fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let entries = self.entries.lock().map_err(|_| eyre!("memory store lock poisoned"))?;
		Ok(entries.get(key).cloned())
	}

	fn put(&self, key: &str, value: &[u8]) -> Result<()> {
		let mut entries = self.entries.lock().map_err(|_| eyre!("memory store lock poisoned"))?;
		entries.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	fn delete(&self, pattern: &str) -> Result<()> {
		let mut entries = self.entries.lock().map_err(|_| eyre!("memory store lock poisoned"))?;
		entries.retain(|key, _| !matches_pattern(key, pattern));
		Ok(())
	}
}

/// One `<key>.json` file per entry inside a directory
#[derive(Clone, Debug)]
pub struct FileKv {
	dir: PathBuf,
}

impl FileKv {
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create store dir {}: {}", dir.display(), e))?;
		Ok(Self { dir })
	}

	/// Store under the XDG state directory
	#[cfg(feature = "xdg")]
	pub fn in_state_dir() -> Result<Self> {
		Self::open(xdg_state_dir!("answers"))
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let safe_key: String = key.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
		self.dir.join(format!("{safe_key}.json"))
	}
}

impl KvStore for FileKv {
	fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let path = self.path_for(key);
		match std::fs::read(&path) {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(eyre!("Failed to read {}: {}", path.display(), e)),
		}
	}

	fn put(&self, key: &str, value: &[u8]) -> Result<()> {
		let path = self.path_for(key);
		// write-then-rename so a crash never leaves a truncated entry
		let tmp = path.with_extension("json.tmp");
		std::fs::write(&tmp, value).map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
		std::fs::rename(&tmp, &path).map_err(|e| eyre!("Failed to move {} into place: {}", path.display(), e))?;
		Ok(())
	}

	fn delete(&self, pattern: &str) -> Result<()> {
		let entries = std::fs::read_dir(&self.dir).map_err(|e| eyre!("Failed to list {}: {}", self.dir.display(), e))?;
		for entry in entries {
			let path = entry.map_err(|e| eyre!("Failed to list {}: {}", self.dir.display(), e))?.path();
			let Some(stem) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.strip_suffix(".json")) else {
				continue;
			};
			if matches_pattern(stem, pattern) {
				std::fs::remove_file(&path).map_err(|e| eyre!("Failed to remove {}: {}", path.display(), e))?;
			}
		}
		Ok(())
	}
}

/// Counter of cached exams
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
	pub total: u64,
	pub last_update: Option<DateTime<Utc>>,
}

/// Learned exams on top of a [`KvStore`]. Last writer wins.
pub struct AnswerStore<K> {
	kv: K,
}

fn store_err(e: impl std::fmt::Display) -> EngineError {
	EngineError::Store(e.to_string())
}

impl<K: KvStore> AnswerStore<K> {
	pub fn new(kv: K) -> Self {
		Self { kv }
	}

	pub fn kv(&self) -> &K {
		&self.kv
	}

	fn exam_key(fingerprint: &str) -> String {
		format!("{EXAM_KEY_PREFIX}{fingerprint}")
	}

	/// Any entry for the fingerprint, perfect or not
	pub fn get(&self, fingerprint: &str) -> Result<Option<LearnedExam>, EngineError> {
		let Some(bytes) = self.kv.get(&Self::exam_key(fingerprint)).map_err(store_err)? else {
			return Ok(None);
		};
		match serde_json::from_slice(&bytes) {
			Ok(exam) => Ok(Some(exam)),
			Err(e) => {
				// an unreadable entry is as good as none: it gets relearned and overwritten
				tracing::warn!(fingerprint, error = %e, "discarding corrupt cache entry");
				Ok(None)
			}
		}
	}

	/// Entry eligible for replay, i.e. a perfect one
	pub fn replayable(&self, fingerprint: &str) -> Result<Option<LearnedExam>, EngineError> {
		Ok(self.get(fingerprint)?.filter(|exam| exam.perfect))
	}

	/// Upsert. The first write of a fingerprint bumps the cached-exam counter.
	pub fn put(&self, exam: &LearnedExam) -> Result<(), EngineError> {
		let key = Self::exam_key(&exam.url_fingerprint);
		let is_new = self.kv.get(&key).map_err(store_err)?.is_none();
		let bytes = serde_json::to_vec_pretty(exam).map_err(store_err)?;
		self.kv.put(&key, &bytes).map_err(store_err)?;

		if is_new {
			let mut stats = self.stats()?;
			stats.total += 1;
			stats.last_update = Some(Utc::now());
			self.write_stats(&stats)?;
		}
		tracing::debug!(fingerprint = %exam.url_fingerprint, perfect = exam.perfect, is_new, "stored learned exam");
		Ok(())
	}

	/// Drop every learned exam and reset the counter
	pub fn clear(&self) -> Result<(), EngineError> {
		self.kv.delete(&format!("{EXAM_KEY_PREFIX}*")).map_err(store_err)?;
		self.write_stats(&CacheStats::default())
	}

	pub fn stats(&self) -> Result<CacheStats, EngineError> {
		match self.kv.get(STATS_KEY).map_err(store_err)? {
			Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
			None => Ok(CacheStats::default()),
		}
	}

	fn write_stats(&self, stats: &CacheStats) -> Result<(), EngineError> {
		let bytes = serde_json::to_vec(stats).map_err(store_err)?;
		self.kv.put(STATS_KEY, &bytes).map_err(store_err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{LearnedQuestion, QuestionKind, fingerprint};

	fn exam(url: &str, perfect: bool) -> LearnedExam {
		let now = Utc::now();
		LearnedExam {
			url: url.to_string(),
			url_fingerprint: fingerprint(url),
			perfect,
			questions: vec![LearnedQuestion {
				text: "Q".into(),
				correct_option_indices: vec![2],
				kind: QuestionKind::Single,
				resolved: perfect,
			}],
			learned_at: now,
			updated_at: now,
		}
	}

	fn roundtrip<K: KvStore>(store: AnswerStore<K>) {
		let a = exam("https://exam.test/a", true);
		assert!(store.get(&a.url_fingerprint).unwrap().is_none());

		store.put(&a).unwrap();
		assert_eq!(store.get(&a.url_fingerprint).unwrap(), Some(a.clone()));
		assert_eq!(store.stats().unwrap().total, 1);

		// upsert of the same key does not count again
		store.put(&a).unwrap();
		assert_eq!(store.stats().unwrap().total, 1);

		let b = exam("https://exam.test/b", false);
		store.put(&b).unwrap();
		assert_eq!(store.stats().unwrap().total, 2);
		assert!(store.get(&b.url_fingerprint).unwrap().is_some());
		assert!(store.replayable(&b.url_fingerprint).unwrap().is_none());
		assert!(store.replayable(&a.url_fingerprint).unwrap().is_some());

		store.clear().unwrap();
		assert!(store.get(&a.url_fingerprint).unwrap().is_none());
		assert!(store.get(&b.url_fingerprint).unwrap().is_none());
		assert_eq!(store.stats().unwrap(), CacheStats::default());
	}

	#[test]
	fn memory_store() {
		roundtrip(AnswerStore::new(MemoryKv::new()));
	}

	#[test]
	fn file_store() {
		let dir = tempfile::tempdir().unwrap();
		roundtrip(AnswerStore::new(FileKv::open(dir.path().join("answers")).unwrap()));
	}

	#[test]
	fn file_store_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let a = exam("https://exam.test/a#intro", true);
		AnswerStore::new(FileKv::open(dir.path()).unwrap()).put(&a).unwrap();

		let reopened = AnswerStore::new(FileKv::open(dir.path()).unwrap());
		assert_eq!(reopened.get(&fingerprint("https://exam.test/a")).unwrap(), Some(a));
	}

	#[test]
	fn corrupt_entry_reads_as_missing() {
		let kv = MemoryKv::new();
		let fp = fingerprint("https://exam.test/a");
		kv.put(&format!("{EXAM_KEY_PREFIX}{fp}"), b"{not json").unwrap();
		assert!(AnswerStore::new(kv).get(&fp).unwrap().is_none());
	}

	#[test]
	fn delete_pattern_keeps_other_keys() {
		let kv = MemoryKv::new();
		kv.put("exam_learned_x", b"1").unwrap();
		kv.put("exam_learned_y", b"2").unwrap();
		kv.put("unrelated", b"3").unwrap();
		kv.delete("exam_learned_*").unwrap();
		assert!(kv.get("exam_learned_x").unwrap().is_none());
		assert_eq!(kv.get("unrelated").unwrap(), Some(b"3".to_vec()));
	}
}
