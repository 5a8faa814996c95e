//! Page steps shared by learning and replay: load, fill, select, submit, read score.

use std::time::Duration;

use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::{
	Question, UserInputs,
	config::Timings,
	driver::PageDriver,
	error::EngineError,
	progress::{Phase, Progress, Reporter},
	score::{ScoreSample, match_score},
	snapshot::PageModel,
};

/// One caller's sequential use of a driver
pub struct PageSession<'a, D: ?Sized> {
	driver: &'a D,
	timings: Timings,
	cancel: CancellationToken,
	reporter: Reporter<'a>,
}

impl<'a, D: PageDriver + ?Sized> PageSession<'a, D> {
	pub fn new(driver: &'a D, timings: Timings, cancel: CancellationToken, reporter: Reporter<'a>) -> Self {
		Self { driver, timings, cancel, reporter }
	}

	pub fn driver(&self) -> &'a D {
		self.driver
	}

	pub fn timings(&self) -> &Timings {
		&self.timings
	}

	pub fn reporter(&self) -> &Reporter<'a> {
		&self.reporter
	}

	pub fn check_cancelled(&self) -> Result<(), EngineError> {
		if self.cancel.is_cancelled() { Err(EngineError::Cancelled) } else { Ok(()) }
	}

	/// Fixed wait that still honours cancellation
	pub async fn pause(&self, duration: Duration) -> Result<(), EngineError> {
		if duration.is_zero() {
			return self.check_cancelled();
		}
		tokio::select! {
			_ = tokio::time::sleep(duration) => Ok(()),
			_ = self.cancel.cancelled() => Err(EngineError::Cancelled),
		}
	}

	/// Wait after a trial submit: base delay plus random jitter
	pub fn trial_delay(&self) -> Duration {
		let jitter_ms = self.timings.trial_jitter.as_millis() as u64;
		let extra = if jitter_ms == 0 { 0 } else { rand::random_range(0..=jitter_ms) };
		self.timings.trial_settle + Duration::from_millis(extra)
	}

	/// Navigate to `url` and parse what is there. Fields are not touched.
	pub async fn load(&self, url: &str) -> Result<PageModel, EngineError> {
		self.check_cancelled()?;
		self.driver.open(url).await?;
		self.pause(self.timings.settle).await?;
		let snapshot = self.driver.snapshot().await?;
		let page = PageModel::parse(&snapshot);
		tracing::debug!(load = snapshot.load.0, questions = page.questions.len(), fields = page.fields.len(), "page parsed");
		Ok(page)
	}

	/// Type caller values into the detected fields; returns how many were filled
	pub async fn fill_fields(&self, page: &PageModel, inputs: &UserInputs) -> Result<usize, EngineError> {
		let mut filled = 0;
		for field in &page.fields {
			let Some(value) = inputs.get(&field.key).filter(|v| !v.is_empty()) else {
				continue;
			};
			self.driver.fill(&field.handle, value).await?;
			filled += 1;
			self.pause(self.timings.click_interval).await?;
		}
		Ok(filled)
	}

	/// Click the options of `answers[q]` for every question of a freshly loaded page
	pub async fn apply(&self, page: &PageModel, answers: &[Vec<usize>]) -> Result<(), EngineError> {
		if answers.len() != page.questions.len() {
			return Err(EngineError::PageChanged {
				expected: answers.len(),
				found: page.questions.len(),
			});
		}
		for (question, indices) in page.questions.iter().zip(answers) {
			self.select(question, indices).await?;
		}
		Ok(())
	}

	/// Click the given options of one question
	pub async fn select(&self, question: &Question, indices: &[usize]) -> Result<(), EngineError> {
		for &idx in indices {
			let option = question
				.options
				.get(idx)
				.ok_or_else(|| eyre!("option {} out of range for question '{}' ({} options)", idx, question.id, question.options.len()))?;
			self.driver.click(&option.handle).await?;
			self.pause(self.timings.click_interval).await?;
		}
		Ok(())
	}

	/// Click submit, wait `settle`, read the score. `None` means the score could not be read.
	pub async fn submit_and_read(&self, page: &PageModel, settle: Duration) -> Result<Option<ScoreSample>, EngineError> {
		let submit = page.submit.as_ref().ok_or_else(|| eyre!("no submit button on the page"))?;
		self.reporter.emit(Progress::new(Phase::Submitting, "submitting answers"));
		self.driver.click(submit).await?;
		self.pause(settle).await?;

		let text = self.driver.read_page_text().await?;
		let score = match_score(&text);
		match score {
			Some((pattern, sample)) => tracing::debug!(pattern, %sample, "score read"),
			None => tracing::warn!(chars = text.chars().count(), "no score found on the result page"),
		}
		Ok(score.map(|(_, sample)| sample))
	}
}
