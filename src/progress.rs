//! Observational progress events. Never gate control flow on them.

use std::{fmt, sync::Arc};

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
	Analyzing,
	Learning,
	Filling,
	Submitting,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Phase::Analyzing => "analyzing",
			Phase::Learning => "learning",
			Phase::Filling => "filling",
			Phase::Submitting => "submitting",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
	pub phase: Phase,
	pub message: String,
	/// 1-based
	#[serde(skip_serializing_if = "Option::is_none")]
	pub question_index: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub total_questions: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub correct_count: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub loop_count: Option<u32>,
}

impl Progress {
	pub fn new(phase: Phase, message: impl Into<String>) -> Self {
		Self {
			phase,
			message: message.into(),
			question_index: None,
			total_questions: None,
			correct_count: None,
			loop_count: None,
		}
	}

	pub fn question(mut self, index: usize, total: usize) -> Self {
		self.question_index = Some(index);
		self.total_questions = Some(total);
		self
	}

	pub fn total(mut self, total: usize) -> Self {
		self.total_questions = Some(total);
		self
	}

	pub fn correct(mut self, correct: u32) -> Self {
		self.correct_count = Some(correct);
		self
	}

	pub fn round(mut self, loop_count: u32) -> Self {
		self.loop_count = Some(loop_count);
		self
	}
}

/// Caller-supplied progress callback
pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Forwards events to the optional callback and to the log
#[derive(Clone, Copy, Default)]
pub struct Reporter<'a> {
	callback: Option<&'a (dyn Fn(&Progress) + Send + Sync)>,
}

impl<'a> Reporter<'a> {
	pub fn new(callback: Option<&'a (dyn Fn(&Progress) + Send + Sync)>) -> Self {
		Self { callback }
	}

	pub fn emit(&self, progress: Progress) {
		tracing::info!(phase = %progress.phase, question = progress.question_index, round = progress.loop_count, "{}", progress.message);
		if let Some(callback) = self.callback {
			callback(&progress);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;

	#[test]
	fn reporter_forwards_to_callback() {
		let seen = Mutex::new(Vec::new());
		let callback = |p: &Progress| seen.lock().unwrap().push(p.clone());
		let reporter = Reporter::new(Some(&callback));
		reporter.emit(Progress::new(Phase::Learning, "round").round(2).correct(1));
		reporter.emit(Progress::new(Phase::Filling, "q").question(1, 3));

		let seen = seen.into_inner().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0].loop_count, Some(2));
		assert_eq!(seen[1].total_questions, Some(3));
	}

	#[test]
	fn serializes_like_the_ui_expects() {
		let json = serde_json::to_value(Progress::new(Phase::Submitting, "submitting").correct(3)).unwrap();
		assert_eq!(json["phase"], "submitting");
		assert_eq!(json["correctCount"], 3);
		assert!(json.get("loopCount").is_none());
	}
}
