//! Reads `(correct, total)` out of whatever the exam shows after a submit.

use std::{fmt, sync::LazyLock};

use derive_new::new;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Score observed after one submission
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, new)]
pub struct ScoreSample {
	pub correct: u32,
	pub total: u32,
}

impl ScoreSample {
	/// Every question answered correctly
	pub fn is_full(&self) -> bool {
		self.correct == self.total
	}
}

impl fmt::Display for ScoreSample {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.correct, self.total)
	}
}

struct ScorePattern {
	name: &'static str,
	regex: Regex,
	extract: fn(&Captures) -> Option<ScoreSample>,
}

impl ScorePattern {
	fn new(name: &'static str, pattern: &str, extract: fn(&Captures) -> Option<ScoreSample>) -> Self {
		let regex = Regex::new(pattern).unwrap_or_else(|e| panic!("score pattern '{name}' does not compile: {e}"));
		Self { name, regex, extract }
	}
}

fn group(caps: &Captures, i: usize) -> Option<u32> {
	caps.get(i)?.as_str().parse().ok()
}

fn fraction(caps: &Captures) -> Option<ScoreSample> {
	let (correct, total) = (group(caps, 1)?, group(caps, 2)?);
	// rejects dates and other unrelated fractions in page chrome
	(total > 0 && correct <= total).then_some(ScoreSample { correct, total })
}

fn count_only(caps: &Captures) -> Option<ScoreSample> {
	let score = group(caps, 1)?;
	Some(ScoreSample { correct: score, total: score })
}

fn percentage(caps: &Captures) -> Option<ScoreSample> {
	let pct = group(caps, 1)?;
	(pct <= 100).then_some(ScoreSample { correct: pct, total: 100 })
}

/// Labelled formats first: a bare `X/Y` matches far too much to go early.
static PATTERNS: LazyLock<Vec<ScorePattern>> = LazyLock::new(|| {
	vec![
		// the two counts need a separator, or "答对 11 题" splits into 1 and 1
		ScorePattern::new("answered", r"答对\s*(\d+)\s*(?:[/／]\s*(?:共\s*)?|共\s*|题\s*[，,]?\s*共\s*)(\d+)\s*题", fraction),
		ScorePattern::new("answered_en", r"(?i)answered\s+(\d+)\s+(?:of|out\s+of)\s+(\d+)", fraction),
		ScorePattern::new("out_of_correct", r"(?i)(\d+)\s+out\s+of\s+(\d+)\s+(?:correct|right)", fraction),
		ScorePattern::new("labelled_fraction", r"(?:得分|分数|(?i:score))\s*[:：]\s*(\d+)\s*[/／]\s*(\d+)", fraction),
		ScorePattern::new("fraction_with_unit", r"(\d+)\s*[/／]\s*(\d+)\s*(?:题|道|分|(?i:questions?|points?|pts))", fraction),
		ScorePattern::new("bare_fraction", r"(\d+)\s*[/／]\s*(\d+)", fraction),
		ScorePattern::new("score_only", r"(?:得分|分数|(?i:score))\s*[:：]\s*(\d+)", count_only),
		ScorePattern::new("correct_count", r"(?:正确数|正确)\s*[:：]\s*(\d+)\s*题", count_only),
		ScorePattern::new("percentage", r"(?:正确率|准确率|(?i:accuracy|percentage))\s*[:：]\s*(\d+)(?:\.\d+)?\s*%", percentage),
	]
});

/// Score shown on the page, if any known format is present.
///
/// `None` means "cannot verify": callers must not advance state on it.
pub fn read_score(text: &str) -> Option<ScoreSample> {
	match_score(text).map(|(_, sample)| sample)
}

/// Like [`read_score`], also naming the pattern that matched.
pub fn match_score(text: &str) -> Option<(&'static str, ScoreSample)> {
	for pattern in PATTERNS.iter() {
		for caps in pattern.regex.captures_iter(text) {
			if let Some(sample) = (pattern.extract)(&caps) {
				tracing::debug!(pattern = pattern.name, %sample, "score matched");
				return Some((pattern.name, sample));
			}
		}
	}
	None
}
