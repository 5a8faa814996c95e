//! Re-submit cached answers to a fresh load of the exam.

use crate::{
	LearnedExam, UserInputs,
	driver::PageDriver,
	error::EngineError,
	progress::{Phase, Progress},
	score::ScoreSample,
	session::PageSession,
};

/// Replays `cached` and returns the score the page reports.
///
/// Nothing is clicked or submitted unless every cached answer fits the live page.
pub async fn replay<D: PageDriver + ?Sized>(session: &PageSession<'_, D>, url: &str, inputs: &UserInputs, cached: &LearnedExam) -> Result<ScoreSample, EngineError> {
	let reporter = *session.reporter();
	let page = session.load(url).await?;

	let stale = EngineError::StaleCache {
		cached: cached.questions.len(),
		live: page.questions.len(),
	};
	if page.questions.len() != cached.questions.len() {
		return Err(stale);
	}
	for (live, learned) in page.questions.iter().zip(&cached.questions) {
		if learned.correct_option_indices.iter().any(|&idx| idx >= live.options.len()) {
			tracing::warn!(question = %live.text, options = live.options.len(), cached = ?learned.correct_option_indices, "cached option out of range");
			return Err(stale);
		}
	}

	session.fill_fields(&page, inputs).await?;
	let total = page.questions.len();
	for (i, (question, learned)) in page.questions.iter().zip(&cached.questions).enumerate() {
		reporter.emit(Progress::new(Phase::Filling, format!("answering question {}", i + 1)).question(i + 1, total));
		session.select(question, &learned.correct_option_indices).await?;
	}

	session.submit_and_read(&page, session.timings().submit_settle).await?.ok_or(EngineError::UnreadableScore)
}
