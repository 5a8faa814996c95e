//! Entry points: analyze a page, run an exam end to end, manage the answer cache.

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
	InputField, LearnedExam, UserInputs,
	config::Timings,
	driver::PageDriver,
	error::EngineError,
	fingerprint,
	learner::{PassReport, learn_pass},
	progress::{Phase, Progress, ProgressFn, Reporter},
	replay::replay,
	score::ScoreSample,
	session::PageSession,
	store::{AnswerStore, CacheStats, KvStore},
};

const DEFAULT_MAX_LOOPS: u32 = 10;

#[derive(Clone)]
pub struct ExamOptions {
	/// Learning rounds before settling for `NeedsReview`
	pub max_loops: u32,
	pub cancel: CancellationToken,
	pub on_progress: Option<ProgressFn>,
}

impl Default for ExamOptions {
	fn default() -> Self {
		Self {
			max_loops: DEFAULT_MAX_LOOPS,
			cancel: CancellationToken::new(),
			on_progress: None,
		}
	}
}

impl fmt::Debug for ExamOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExamOptions")
			.field("max_loops", &self.max_loops)
			.field("cancelled", &self.cancel.is_cancelled())
			.field("on_progress", &self.on_progress.is_some())
			.finish()
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
	/// Cached answers reproduced a full score
	Replayed,
	/// A learning pass reached a full score
	Learned,
	/// Learning completed at least one pass but never reached a full score
	NeedsReview,
	Cancelled,
	/// No pass completed
	Failed,
}

impl OutcomeStatus {
	pub fn is_success(&self) -> bool {
		matches!(self, OutcomeStatus::Replayed | OutcomeStatus::Learned)
	}
}

impl fmt::Display for OutcomeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OutcomeStatus::Replayed => "replayed",
			OutcomeStatus::Learned => "learned",
			OutcomeStatus::NeedsReview => "needs review",
			OutcomeStatus::Cancelled => "cancelled",
			OutcomeStatus::Failed => "failed",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Debug)]
pub struct ExamOutcome {
	pub status: OutcomeStatus,
	pub success: bool,
	pub final_score: Option<ScoreSample>,
	pub learned_exam: Option<LearnedExam>,
	/// PNG of the result page, taken on success
	pub screenshot: Option<Vec<u8>>,
	pub message: String,
	/// Learning passes attempted; 0 when replay alone sufficed
	pub loops: u32,
}

impl ExamOutcome {
	fn new(status: OutcomeStatus, message: impl Into<String>) -> Self {
		Self {
			status,
			success: status.is_success(),
			final_score: None,
			learned_exam: None,
			screenshot: None,
			message: message.into(),
			loops: 0,
		}
	}
}

/// What a page offers, without touching it
#[derive(Clone, Debug)]
pub struct PageAnalysis {
	pub url: String,
	pub fields: Vec<InputField>,
	pub question_count: usize,
}

pub struct ExamEngine<D, K> {
	driver: D,
	store: AnswerStore<K>,
	timings: Timings,
}

impl<D: PageDriver, K: KvStore> ExamEngine<D, K> {
	pub fn new(driver: D, kv: K, timings: Timings) -> Self {
		Self {
			driver,
			store: AnswerStore::new(kv),
			timings,
		}
	}

	pub fn driver(&self) -> &D {
		&self.driver
	}

	pub fn store(&self) -> &AnswerStore<K> {
		&self.store
	}

	fn session<'a>(&'a self, cancel: CancellationToken, on_progress: Option<&'a ProgressFn>) -> PageSession<'a, D> {
		PageSession::new(&self.driver, self.timings, cancel, Reporter::new(on_progress.map(|f| &**f)))
	}

	/// Open the page and report detected fields and question count
	pub async fn analyze_page(&self, url: &str) -> Result<PageAnalysis, EngineError> {
		let session = self.session(CancellationToken::new(), None);
		session.reporter().emit(Progress::new(Phase::Analyzing, format!("analyzing {url}")));
		let page = session.load(url).await?;
		Ok(PageAnalysis {
			url: url.to_string(),
			fields: page.fields,
			question_count: page.questions.len(),
		})
	}

	/// Answer the exam at `url`, replaying cached answers when they are known to be perfect
	/// and learning otherwise. Failures are reported in the outcome, never as `Err`.
	pub async fn auto_exam(&self, url: &str, inputs: &UserInputs, options: &ExamOptions) -> ExamOutcome {
		let session = self.session(options.cancel.clone(), options.on_progress.as_ref());
		let reporter = *session.reporter();
		let fp = fingerprint(url);

		let mut previous = match self.store.get(&fp) {
			Ok(entry) => entry,
			Err(e) => {
				tracing::warn!(error = %e, "cannot read the answer cache, learning from scratch");
				None
			}
		};

		if let Some(cached) = previous.clone().filter(|exam| exam.perfect) {
			reporter.emit(Progress::new(Phase::Analyzing, "found cached answers, replaying").total(cached.questions.len()));
			match replay(&session, url, inputs, &cached).await {
				Ok(score) if score.is_full() => {
					let mut outcome = ExamOutcome::new(OutcomeStatus::Replayed, format!("replayed cached answers: {score}"));
					outcome.final_score = Some(score);
					outcome.learned_exam = Some(cached);
					outcome.screenshot = self.capture().await;
					return outcome;
				}
				Ok(score) => tracing::warn!(%score, "cached answers no longer score full, relearning"),
				Err(EngineError::Cancelled) => return ExamOutcome::new(OutcomeStatus::Cancelled, "cancelled during replay"),
				Err(e) => tracing::warn!(error = %e, "replay failed, relearning"),
			}
			// a stale perfect entry must not seed the new pass
			previous = None;
		}

		let mut last_pass: Option<PassReport> = None;
		let mut last_error: Option<EngineError> = None;
		let mut loops = 0;

		while loops < options.max_loops {
			if loops > 0 && session.pause(self.timings.round_cooldown).await.is_err() {
				return cancelled(last_pass, loops);
			}
			loops += 1;
			reporter.emit(Progress::new(Phase::Learning, format!("learning round {loops}/{}", options.max_loops)).round(loops));

			match learn_pass(&session, url, inputs, previous.as_ref(), loops).await {
				Ok(report) => {
					tracing::info!(round = loops, score = %report.score, trials = report.trials, commits = report.commits.len(), "pass complete");
					if let Err(e) = self.store.put(&report.exam) {
						let mut outcome = ExamOutcome::new(OutcomeStatus::Failed, format!("learned {} but could not persist it: {e}", report.score));
						outcome.final_score = Some(report.score);
						outcome.learned_exam = Some(report.exam);
						outcome.loops = loops;
						return outcome;
					}
					if report.exam.perfect {
						let mut outcome = ExamOutcome::new(OutcomeStatus::Learned, format!("learned all answers in {loops} round(s): {}", report.score));
						outcome.final_score = Some(report.score);
						outcome.learned_exam = Some(report.exam);
						outcome.screenshot = self.capture().await;
						outcome.loops = loops;
						return outcome;
					}
					previous = Some(report.exam.clone());
					last_pass = Some(report);
				}
				Err(EngineError::Cancelled) => return cancelled(last_pass, loops),
				Err(e) => {
					reporter.emit(Progress::new(Phase::Learning, format!("round {loops} failed: {e}")).round(loops));
					let retryable = e.is_retryable();
					last_error = Some(e);
					if !retryable {
						break;
					}
				}
			}
		}

		match last_pass {
			Some(report) => {
				let mut outcome = ExamOutcome::new(OutcomeStatus::NeedsReview, format!("best score after {loops} round(s) is {}, manual review needed", report.score));
				outcome.final_score = Some(report.score);
				outcome.learned_exam = Some(report.exam);
				outcome.loops = loops;
				outcome
			}
			None => {
				let reason = last_error.map(|e| e.to_string()).unwrap_or_else(|| "no learning rounds allowed".to_string());
				let mut outcome = ExamOutcome::new(OutcomeStatus::Failed, format!("learning failed: {reason}"));
				outcome.loops = loops;
				outcome
			}
		}
	}

	pub fn clear_cache(&self) -> Result<(), EngineError> {
		self.store.clear()
	}

	pub fn cache_stats(&self) -> Result<CacheStats, EngineError> {
		self.store.stats()
	}

	async fn capture(&self) -> Option<Vec<u8>> {
		match self.driver.screenshot().await {
			Ok(png) => Some(png),
			Err(e) => {
				tracing::warn!(error = %e, "screenshot failed");
				None
			}
		}
	}
}

fn cancelled(last_pass: Option<PassReport>, loops: u32) -> ExamOutcome {
	let mut outcome = ExamOutcome::new(OutcomeStatus::Cancelled, format!("cancelled after {loops} round(s)"));
	if let Some(report) = last_pass {
		outcome.final_score = Some(report.score);
		outcome.learned_exam = Some(report.exam);
	}
	outcome.loops = loops;
	outcome
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_full_scores_count_as_success() {
		assert!(ExamOutcome::new(OutcomeStatus::Replayed, "").success);
		assert!(ExamOutcome::new(OutcomeStatus::Learned, "").success);
		assert!(!ExamOutcome::new(OutcomeStatus::NeedsReview, "").success);
		assert!(!ExamOutcome::new(OutcomeStatus::Cancelled, "").success);
	}

	#[test]
	fn default_budget() {
		let options = ExamOptions::default();
		assert_eq!(options.max_loops, 10);
		assert!(!options.cancel.is_cancelled());
	}
}
