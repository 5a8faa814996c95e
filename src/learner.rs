//! One learning pass: probe options one question at a time against the score oracle.
//!
//! Starting from a baseline vector, every trial changes exactly one question and is
//! kept only if the reported correct count strictly goes up. Each trial re-opens the
//! page, since handles of the previous load are dead after a submit.

use chrono::Utc;

use crate::{
	LearnedExam, LearnedQuestion, QuestionKind, UserInputs,
	driver::PageDriver,
	error::EngineError,
	fingerprint,
	progress::{Phase, Progress},
	score::ScoreSample,
	session::PageSession,
	snapshot::PageModel,
};

/// A trial that improved the score and was kept
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Commit {
	/// 0-based question position
	pub question: usize,
	pub option: usize,
	pub score: ScoreSample,
}

#[derive(Clone, Debug)]
pub struct PassReport {
	pub exam: LearnedExam,
	/// Score of the confirming submit
	pub score: ScoreSample,
	/// Trial submits, baseline and confirmation excluded
	pub trials: u32,
	pub commits: Vec<Commit>,
}

/// Starting vector and which questions need no probing.
///
/// Resolved answers of a previous pass are reused only while the question count still matches.
fn baseline(page: &PageModel, previous: Option<&LearnedExam>) -> (Vec<Vec<usize>>, Vec<bool>) {
	let cached = previous.filter(|exam| exam.questions.len() == page.questions.len());
	page.questions
		.iter()
		.enumerate()
		.map(|(i, question)| match cached.map(|exam| &exam.questions[i]) {
			Some(learned) if learned.resolved && !learned.correct_option_indices.is_empty() && learned.correct_option_indices.iter().all(|&idx| idx < question.options.len()) =>
				(learned.correct_option_indices.clone(), true),
			_ => (vec![0], false),
		})
		.unzip()
}

/// Re-open the page and fill it so a trial starts from a clean load
async fn reload<D: PageDriver + ?Sized>(session: &PageSession<'_, D>, url: &str, inputs: &UserInputs, expected: usize) -> Result<PageModel, EngineError> {
	let page = session.load(url).await?;
	if page.questions.len() != expected {
		return Err(EngineError::PageChanged {
			expected,
			found: page.questions.len(),
		});
	}
	session.fill_fields(&page, inputs).await?;
	Ok(page)
}

pub async fn learn_pass<D: PageDriver + ?Sized>(session: &PageSession<'_, D>, url: &str, inputs: &UserInputs, previous: Option<&LearnedExam>, round: u32) -> Result<PassReport, EngineError> {
	let reporter = *session.reporter();

	let page = session.load(url).await?;
	if page.questions.is_empty() {
		return Err(EngineError::NoQuestions);
	}
	session.fill_fields(&page, inputs).await?;
	let total_questions = page.questions.len();

	let (mut best, mut resolved) = baseline(&page, previous);
	let resumed = resolved.iter().filter(|r| **r).count();
	if resumed > 0 {
		tracing::info!(resumed, total_questions, "resuming from previously resolved answers");
	}

	reporter.emit(Progress::new(Phase::Learning, format!("round {round}: baseline submit")).total(total_questions).round(round));
	session.apply(&page, &best).await?;
	let mut last = session.submit_and_read(&page, session.timings().submit_settle).await?.ok_or(EngineError::UnreadableScore)?;
	tracing::info!(round, score = %last, "baseline");

	let mut trials = 0;
	let mut commits = Vec::new();

	for q in 0..total_questions {
		if last.is_full() {
			break;
		}
		if resolved[q] {
			continue;
		}
		let question = &page.questions[q];
		let mut abandoned = false;

		for option in 1..question.options.len() {
			session.check_cancelled()?;
			reporter.emit(
				Progress::new(Phase::Learning, format!("question {}: trying option {}", q + 1, option + 1))
					.question(q + 1, total_questions)
					.correct(last.correct)
					.round(round),
			);

			let live = reload(session, url, inputs, total_questions).await?;
			if option >= live.questions[q].options.len() {
				tracing::warn!(question = q + 1, option, "option vanished on reload, skipping question");
				abandoned = true;
				break;
			}
			let mut trial = best.clone();
			trial[q] = vec![option];
			session.apply(&live, &trial).await?;
			let read = session.submit_and_read(&live, session.trial_delay()).await?;
			trials += 1;

			match read {
				Some(score) if score.correct > last.correct => {
					tracing::info!(question = q + 1, option = option + 1, from = %last, to = %score, "improvement");
					best = trial;
					last = score;
					resolved[q] = true;
					commits.push(Commit { question: q, option, score });
					break;
				}
				Some(score) => tracing::debug!(question = q + 1, option = option + 1, %score, "no improvement"),
				None => {
					tracing::warn!(question = q + 1, option = option + 1, "score unreadable, abandoning question");
					abandoned = true;
					break;
				}
			}
			if last.is_full() {
				break;
			}
		}

		// every alternative scored no better, so the baseline option was already right
		if !resolved[q] && !abandoned && question.kind == QuestionKind::Single && question.options.len() > 1 {
			resolved[q] = true;
		}
	}

	session.check_cancelled()?;
	reporter.emit(Progress::new(Phase::Learning, format!("round {round}: confirming")).total(total_questions).correct(last.correct).round(round));
	let confirm = reload(session, url, inputs, total_questions).await?;
	session.apply(&confirm, &best).await?;
	let score = session.submit_and_read(&confirm, session.timings().submit_settle).await?.ok_or(EngineError::UnreadableScore)?;
	if score != last {
		tracing::warn!(expected = %last, got = %score, "confirming submit disagrees with the trials");
	}

	let perfect = score.is_full();
	let now = Utc::now();
	let questions = page
		.questions
		.iter()
		.zip(best)
		.zip(resolved)
		// questions skipped by the early stop keep `resolved == false`; `perfect` covers them
		.map(|((question, indices), resolved)| LearnedQuestion {
			text: question.text.clone(),
			correct_option_indices: indices,
			kind: question.kind,
			resolved,
		})
		.collect();
	let exam = LearnedExam {
		url: url.to_string(),
		url_fingerprint: fingerprint(url),
		perfect,
		questions,
		learned_at: previous.map(|p| p.learned_at).unwrap_or(now),
		updated_at: now,
	};

	Ok(PassReport { exam, score, trials, commits })
}
