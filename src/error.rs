//! Failure taxonomy of a learning or replay pass.
//!
//! None of these escape [`crate::ExamEngine::auto_exam`]; they are folded into its outcome.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
	/// The automation backend failed (navigation, crashed page, missing element).
	#[error("driver error: {0}")]
	Driver(color_eyre::Report),

	/// Post-submission text matched no known score format. Usually a captcha or an error page.
	#[error("cannot read the score from the page")]
	UnreadableScore,

	/// Cached answers no longer fit the live page.
	#[error("cached answers are stale: cached {cached} questions, page has {live}")]
	StaleCache { cached: usize, live: usize },

	/// The question count changed between two loads of the same pass.
	#[error("page structure changed mid-pass: expected {expected} questions, found {found}")]
	PageChanged { expected: usize, found: usize },

	#[error("no questions found on the page")]
	NoQuestions,

	#[error("cancelled")]
	Cancelled,

	#[error("answer store: {0}")]
	Store(String),
}

// `Report` is not `std::error::Error`, so no `#[from]`/`#[source]` here
impl From<color_eyre::Report> for EngineError {
	fn from(report: color_eyre::Report) -> Self {
		EngineError::Driver(report)
	}
}

impl EngineError {
	/// Whether the orchestrator may spend another round after this error.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, EngineError::Cancelled | EngineError::Store(_))
	}
}
