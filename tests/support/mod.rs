#![allow(dead_code)]

use std::{
	collections::BTreeSet,
	sync::{Arc, Mutex},
};

use async_trait::async_trait;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use exam_autopilot::{LoadId, PageDriver, PageRef, Progress, ProgressFn, Snapshot};

pub const URL: &str = "https://exam.test/vm/onboarding.aspx";

#[derive(Clone, Debug)]
pub struct FakeQuestion {
	pub text: String,
	pub options: Vec<String>,
	pub correct: BTreeSet<usize>,
	pub multi: bool,
}

impl FakeQuestion {
	pub fn single(text: &str, options: usize, correct: usize) -> Self {
		Self {
			text: text.to_string(),
			options: (0..options).map(|i| format!("Option {}", (b'A' + i as u8) as char)).collect(),
			correct: BTreeSet::from([correct]),
			multi: false,
		}
	}

	pub fn multi(text: &str, options: usize, correct: &[usize]) -> Self {
		Self {
			multi: true,
			correct: correct.iter().copied().collect(),
			..Self::single(text, options, 0)
		}
	}
}

#[derive(Default)]
struct State {
	questions: Vec<FakeQuestion>,
	load: LoadId,
	selected: Vec<BTreeSet<usize>>,
	page_text: String,
	opens: u32,
	submits: u32,
	clicks: u32,
	fills: Vec<(String, String)>,
	/// Result page shows no score
	unreadable: bool,
	/// Only this submit (1-based) shows no score
	unreadable_submit: Option<u32>,
	/// Result page wording, given `(correct, total)`
	result_text: Option<fn(usize, usize) -> String>,
	/// Appended to the exam once this many opens happened
	late_question: Option<(u32, FakeQuestion)>,
}

/// In-memory exam page that grades like a quiz site: one point per exactly-right question.
pub struct FakeExam {
	state: Mutex<State>,
}

impl FakeExam {
	pub fn new(questions: Vec<FakeQuestion>) -> Self {
		Self {
			state: Mutex::new(State { questions, ..Default::default() }),
		}
	}

	/// Two questions with three options each; answers are B and C
	pub fn two_by_three() -> Self {
		Self::new(vec![FakeQuestion::single("Question 1: pick the safe practice", 3, 1), FakeQuestion::single("Question 2: pick the right procedure", 3, 2)])
	}

	pub fn unreadable(self) -> Self {
		self.state.lock().unwrap().unreadable = true;
		self
	}

	pub fn unreadable_on_submit(self, submit: u32) -> Self {
		self.state.lock().unwrap().unreadable_submit = Some(submit);
		self
	}

	pub fn with_result_text(self, text: fn(usize, usize) -> String) -> Self {
		self.state.lock().unwrap().result_text = Some(text);
		self
	}

	pub fn with_late_question(self, after_opens: u32, question: FakeQuestion) -> Self {
		self.state.lock().unwrap().late_question = Some((after_opens, question));
		self
	}

	pub fn opens(&self) -> u32 {
		self.state.lock().unwrap().opens
	}

	pub fn submits(&self) -> u32 {
		self.state.lock().unwrap().submits
	}

	pub fn clicks(&self) -> u32 {
		self.state.lock().unwrap().clicks
	}

	pub fn fills(&self) -> Vec<(String, String)> {
		self.state.lock().unwrap().fills.clone()
	}
}

fn render(state: &State) -> String {
	let mut lines = vec![
		r#"- heading "Onboarding exam" [ref=title] [level=1]"#.to_string(),
		r#"- text "姓名""#.to_string(),
		r#"- textbox [ref=name]"#.to_string(),
		r#"- textbox "Phone number" [ref=phone]"#.to_string(),
	];
	for (q, question) in state.questions.iter().enumerate() {
		lines.push(format!(r#"- heading "{}" [ref=q{q}] [level=3]"#, question.text));
		let (group, role) = if question.multi { ("group", "checkbox") } else { ("radiogroup", "radio") };
		lines.push(format!("  - {group}:"));
		for (o, option) in question.options.iter().enumerate() {
			let checked = if state.selected.get(q).is_some_and(|s| s.contains(&o)) { " [checked]" } else { "" };
			lines.push(format!(r#"    - {role} "{option}" [ref=q{q}o{o}]{checked}"#));
		}
	}
	lines.push(r#"- button "提交" [ref=submit]"#.to_string());
	lines.join("\n")
}

fn option_of(id: &str) -> Option<(usize, usize)> {
	let (q, o) = id.strip_prefix('q')?.split_once('o')?;
	Some((q.parse().ok()?, o.parse().ok()?))
}

impl State {
	fn ensure_live(&self, target: &PageRef) -> Result<()> {
		if !target.is_from(self.load) {
			bail!("stale handle {} from load {} (page is at load {})", target, target.load().0, self.load.0);
		}
		Ok(())
	}

	fn grade(&self) -> usize {
		self.questions.iter().zip(&self.selected).filter(|(question, selected)| question.correct == **selected).count()
	}
}

#[async_trait]
impl PageDriver for FakeExam {
	async fn open(&self, url: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		if url.split('#').next() != Some(URL) {
			bail!("navigation to unknown url {url}");
		}
		state.opens += 1;
		let due = matches!(&state.late_question, Some((after, _)) if state.opens > *after);
		if due && let Some((_, question)) = state.late_question.take() {
			state.questions.push(question);
		}
		state.load = state.load.next();
		state.selected = vec![BTreeSet::new(); state.questions.len()];
		let text = render(&state);
		state.page_text = text;
		Ok(())
	}

	async fn snapshot(&self) -> Result<Snapshot> {
		let state = self.state.lock().unwrap();
		Ok(Snapshot::new(state.load, render(&state)))
	}

	async fn click(&self, target: &PageRef) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		state.ensure_live(target)?;
		state.clicks += 1;
		if target.id() == "submit" {
			state.submits += 1;
			let (correct, total) = (state.grade(), state.questions.len());
			let text = if state.unreadable || state.unreadable_submit == Some(state.submits) {
				"系统繁忙，请稍后再试".to_string()
			} else if let Some(result_text) = state.result_text {
				result_text(correct, total)
			} else {
				format!("提交成功！答对 {correct} / 共 {total} 题")
			};
			state.page_text = text;
			return Ok(());
		}
		let (q, o) = option_of(target.id()).ok_or_else(|| eyre!("no clickable element {target}"))?;
		let multi = state.questions.get(q).ok_or_else(|| eyre!("no question {q}"))?.multi;
		let selected = &mut state.selected[q];
		if multi {
			if !selected.remove(&o) {
				selected.insert(o);
			}
		} else {
			*selected = BTreeSet::from([o]);
		}
		Ok(())
	}

	async fn fill(&self, target: &PageRef, value: &str) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		state.ensure_live(target)?;
		state.fills.push((target.id().to_string(), value.to_string()));
		Ok(())
	}

	async fn read_page_text(&self) -> Result<String> {
		Ok(self.state.lock().unwrap().page_text.clone())
	}

	async fn screenshot(&self) -> Result<Vec<u8>> {
		Ok(b"\x89PNG fake".to_vec())
	}
}

/// Progress events seen by a callback
pub type Seen = Arc<Mutex<Vec<Progress>>>;

pub fn recorder() -> (Seen, ProgressFn) {
	let seen: Seen = Default::default();
	let sink = seen.clone();
	let callback: ProgressFn = Arc::new(move |p: &Progress| sink.lock().unwrap().push(p.clone()));
	(seen, callback)
}
