use std::{collections::BTreeMap, fmt, str::FromStr};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod browser;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod learner;
pub mod progress;
pub mod replay;
pub mod score;
pub mod session;
pub mod snapshot;
pub mod store;

pub use driver::{LoadId, PageDriver, PageRef, Snapshot};
pub use engine::{ExamEngine, ExamOptions, ExamOutcome, OutcomeStatus, PageAnalysis};
pub use error::EngineError;
pub use progress::{Phase, Progress, ProgressFn};
pub use score::ScoreSample;

/// Length of the cache key derived from an exam URL
const FINGERPRINT_LEN: usize = 32;

/// Stable cache key for an exam URL. The fragment is ignored.
pub fn fingerprint(url: &str) -> String {
	let clean = url.split('#').next().unwrap_or(url);
	let digest = Sha256::digest(clean.as_bytes());
	let mut encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
	encoded.truncate(FINGERPRINT_LEN);
	encoded
}

/// Whether a question accepts one or several options
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
	/// Radio buttons
	#[default]
	Single,
	/// Checkboxes
	Multiple,
}

/// A choice of a question, as found on the current page load
#[derive(Clone, Debug)]
pub struct ExamOption {
	/// The label shown next to the control
	pub text: String,
	/// Handle of the control; dies with the page load
	pub handle: PageRef,
	/// Position within the question, starting at 0
	pub index: usize,
}

/// A question parsed from a snapshot
#[derive(Clone, Debug)]
pub struct Question {
	/// Handle id of the question head, or `q{n}`. Only stable within one load.
	pub id: String,
	pub text: String,
	pub options: Vec<ExamOption>,
	pub kind: QuestionKind,
}

impl Question {
	/// Returns true if this is a multi-choice (checkbox) question
	pub fn is_multi(&self) -> bool {
		self.kind == QuestionKind::Multiple
	}
}

impl fmt::Display for Question {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.text)?;
		writeln!(f)?;
		let marker = if self.is_multi() { "[ ]" } else { "( )" };
		for option in &self.options {
			writeln!(f, "{} {}. {}", marker, option.index + 1, option.text)?;
		}
		Ok(())
	}
}

/// Semantic kind of a free-text field the caller may want filled
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKey {
	Name,
	Phone,
	Dept,
	Company,
	Email,
	Address,
	IdCard,
	Age,
	Gender,
}

impl FieldKey {
	pub const ALL: [FieldKey; 9] = [
		FieldKey::Name,
		FieldKey::Phone,
		FieldKey::Dept,
		FieldKey::Company,
		FieldKey::Email,
		FieldKey::Address,
		FieldKey::IdCard,
		FieldKey::Age,
		FieldKey::Gender,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			FieldKey::Name => "name",
			FieldKey::Phone => "phone",
			FieldKey::Dept => "dept",
			FieldKey::Company => "company",
			FieldKey::Email => "email",
			FieldKey::Address => "address",
			FieldKey::IdCard => "idcard",
			FieldKey::Age => "age",
			FieldKey::Gender => "gender",
		}
	}

	/// Human-readable label
	pub fn label(&self) -> &'static str {
		match self {
			FieldKey::Name => "姓名",
			FieldKey::Phone => "手机号",
			FieldKey::Dept => "部门",
			FieldKey::Company => "公司",
			FieldKey::Email => "邮箱",
			FieldKey::Address => "地址",
			FieldKey::IdCard => "身份证号",
			FieldKey::Age => "年龄",
			FieldKey::Gender => "性别",
		}
	}

	/// Words that identify this field in a page label. ASCII words must match as whole words.
	pub fn keywords(&self) -> &'static [&'static str] {
		match self {
			FieldKey::Name => &["姓名", "name"],
			FieldKey::Phone => &["手机", "电话", "phone", "mobile", "tel"],
			FieldKey::Dept => &["部门", "单位", "dept", "department"],
			FieldKey::Company => &["公司", "company"],
			FieldKey::Email => &["邮箱", "email", "mail"],
			FieldKey::Address => &["地址", "address"],
			FieldKey::IdCard => &["身份证", "id"],
			FieldKey::Age => &["年龄", "age"],
			FieldKey::Gender => &["性别", "gender"],
		}
	}
}

impl fmt::Display for FieldKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for FieldKey {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let lowered = s.trim().to_lowercase();
		FieldKey::ALL
			.into_iter()
			.find(|k| k.as_str() == lowered)
			.ok_or_else(|| format!("unknown field '{s}' (expected one of: {})", FieldKey::ALL.map(|k| k.as_str()).join(", ")))
	}
}

/// Values the caller wants typed into detected fields
pub type UserInputs = BTreeMap<FieldKey, String>;

/// A free-text input detected on the page
#[derive(Clone, Debug)]
pub struct InputField {
	pub key: FieldKey,
	/// Label as it appears on the page
	pub label: String,
	pub handle: PageRef,
}

/// Learned answer of one question. Stores indices only, never handles.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedQuestion {
	pub text: String,
	pub correct_option_indices: Vec<usize>,
	#[serde(rename = "type")]
	pub kind: QuestionKind,
	/// Confirmed by the score oracle rather than left at the provisional guess
	#[serde(default)]
	pub resolved: bool,
}

/// Answers discovered for one exam URL
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedExam {
	pub url: String,
	pub url_fingerprint: String,
	/// Only perfect exams are ever replayed
	pub perfect: bool,
	pub questions: Vec<LearnedQuestion>,
	pub learned_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl LearnedExam {
	/// Answer vector in question order
	pub fn answer_vector(&self) -> Vec<Vec<usize>> {
		self.questions.iter().map(|q| q.correct_option_indices.clone()).collect()
	}

	pub fn resolved_count(&self) -> usize {
		self.questions.iter().filter(|q| q.resolved).count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fingerprint_ignores_fragment() {
		let url = "https://www.wjx.cn/vm/abc123.aspx";
		assert_eq!(fingerprint(url), fingerprint(&format!("{url}#top")));
		assert_eq!(fingerprint(url), fingerprint(&format!("{url}#/q/3?x=1")));
		assert_eq!(fingerprint(url).len(), FINGERPRINT_LEN);
	}

	#[test]
	fn fingerprint_tells_exams_apart() {
		assert_ne!(fingerprint("https://www.wjx.cn/vm/abc123.aspx"), fingerprint("https://www.wjx.cn/vm/abc124.aspx"));
		assert_ne!(fingerprint("https://exam.test/q?id=1"), fingerprint("https://exam.test/q?id=2"));
	}

	#[test]
	fn field_key_parses_case_insensitively() {
		assert_eq!("Phone".parse::<FieldKey>(), Ok(FieldKey::Phone));
		assert_eq!("idcard".parse::<FieldKey>(), Ok(FieldKey::IdCard));
		assert!("shoe_size".parse::<FieldKey>().is_err());
	}

	#[test]
	fn learned_exam_serializes_without_handles() {
		let now = Utc::now();
		let exam = LearnedExam {
			url: "https://exam.test/1".into(),
			url_fingerprint: fingerprint("https://exam.test/1"),
			perfect: true,
			questions: vec![LearnedQuestion {
				text: "2 + 2 = ?".into(),
				correct_option_indices: vec![1],
				kind: QuestionKind::Single,
				resolved: true,
			}],
			learned_at: now,
			updated_at: now,
		};
		let json = serde_json::to_value(&exam).unwrap();
		assert_eq!(json["questions"][0]["correctOptionIndices"], serde_json::json!([1]));
		assert_eq!(json["questions"][0]["type"], "single");
		let back: LearnedExam = serde_json::from_value(json).unwrap();
		assert_eq!(back, exam);
	}
}
