//! Snapshot parsing: indented text dump -> node tree -> questions, fields, submit button.
//!
//! Line grammar, parsed defensively:
//! ```text
//! - heading "1. Capital of France?" [ref=e4] [level=2]
//!   - radiogroup:
//!     - radio "Paris" [ref=e5]
//!     - radio "Lyon" [ref=e6]
//! - textbox "姓名" [ref=e9]
//! - button "提交" [ref=e12]
//! ```
//! Lines that do not look like a node are skipped. An empty or garbage snapshot yields an
//! empty model rather than an error.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;

use crate::{
	ExamOption, FieldKey, InputField, Question, QuestionKind,
	driver::{LoadId, PageRef, Snapshot},
};

/// Plain text longer than this (in chars) may head a question
const MIN_TEXT_HEAD_CHARS: usize = 6;
/// How much longer than the matched keyword a label may be and still read as a field label
const FIELD_LABEL_SLACK: usize = 5;
const DENY_WORDS: [&str; 10] = ["提交", "确定", "下一步", "说明", "注意", "提示", "请", "submit", "next", "note"];

static LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<indent>[ \t]*)(?P<bullet>-\s*)?(?P<role>[A-Za-z][A-Za-z_-]*)(?P<rest>.*)$").expect("static regex"));
static LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*"(?P<label>(?:[^"\\]|\\.)*)""#).expect("static regex"));
static ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\[(?P<key>[A-Za-z_-]+)(?:=(?P<value>[^\]]*))?\]").expect("static regex"));
static SUBMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)提交|submit|确定|下一[页步题]?|next").expect("static regex"));

/// Role of a snapshot node
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Role {
	Heading,
	Text,
	Button,
	Link,
	TextBox,
	ComboBox,
	Checkbox,
	RadioGroup,
	Radio,
	/// Structural or unknown role, kept so nesting survives
	Other(String),
}

impl Role {
	fn from_word(word: &str) -> Self {
		match word.to_ascii_lowercase().as_str() {
			"heading" => Role::Heading,
			"text" | "paragraph" | "statictext" => Role::Text,
			"button" => Role::Button,
			"link" => Role::Link,
			"textbox" | "searchbox" => Role::TextBox,
			"combobox" => Role::ComboBox,
			"checkbox" => Role::Checkbox,
			"radiogroup" => Role::RadioGroup,
			"radio" => Role::Radio,
			other => Role::Other(other.to_string()),
		}
	}

	/// A single selectable option
	pub fn is_choice(&self) -> bool {
		matches!(self, Role::Radio | Role::Checkbox)
	}

	pub fn is_free_text(&self) -> bool {
		matches!(self, Role::TextBox | Role::ComboBox)
	}
}

#[derive(Clone, Debug)]
pub struct SnapshotNode {
	pub role: Role,
	pub label: String,
	/// `ref` attribute. Nodes without one are decoration.
	pub handle: Option<String>,
	pub attrs: BTreeMap<String, String>,
	pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
	pub fn attr(&self, key: &str) -> Option<&str> {
		self.attrs.get(key).map(String::as_str)
	}
}

fn parse_line(line: &str) -> Option<(usize, SnapshotNode)> {
	if line.trim().is_empty() {
		return None;
	}
	let caps = LINE.captures(line)?;
	let indent = &caps["indent"];
	let depth = indent.chars().filter(|c| *c == '\t').count() + indent.chars().filter(|c| *c == ' ').count() / 2;
	let role = Role::from_word(&caps["role"]);
	// without a bullet only known roles count, so stray prose is not read as a node
	if caps.name("bullet").is_none() && matches!(role, Role::Other(_)) {
		return None;
	}

	let mut rest = caps.name("rest").map_or("", |m| m.as_str());
	if !rest.is_empty() && !rest.starts_with([' ', '\t', ':', '"', '[']) {
		return None;
	}

	let mut label = String::new();
	if let Some(l) = LABEL.captures(rest) {
		label = l["label"].replace("\\\"", "\"").replace("\\\\", "\\");
		rest = &rest[l.get(0).map_or(0, |m| m.end())..];
	}

	let mut attrs = BTreeMap::new();
	while let Some(a) = ATTR.captures(rest) {
		attrs.insert(a["key"].to_string(), a.name("value").map_or(String::new(), |v| v.as_str().to_string()));
		rest = &rest[a.get(0).map_or(rest.len(), |m| m.end())..];
	}

	// `- text: inline content` and `- paragraph [ref=e3]: inline content`
	if label.is_empty()
		&& let Some(inline) = rest.trim_start().strip_prefix(':')
	{
		label = inline.trim().to_string();
	}

	let handle = attrs.remove("ref").filter(|r| !r.is_empty());
	Some((depth, SnapshotNode {
		role,
		label: label.trim().to_string(),
		handle,
		attrs,
		children: Vec::new(),
	}))
}

fn close_top(stack: &mut Vec<(usize, SnapshotNode)>, roots: &mut Vec<SnapshotNode>) {
	if let Some((_, node)) = stack.pop() {
		match stack.last_mut() {
			Some((_, parent)) => parent.children.push(node),
			None => roots.push(node),
		}
	}
}

/// Build the node tree. A line deeper than the current top of the stack becomes its child.
pub fn parse_tree(text: &str) -> Vec<SnapshotNode> {
	let mut roots = Vec::new();
	let mut stack: Vec<(usize, SnapshotNode)> = Vec::new();
	for line in text.lines() {
		let Some((depth, node)) = parse_line(line) else {
			continue;
		};
		while stack.last().is_some_and(|(d, _)| *d >= depth) {
			close_top(&mut stack, &mut roots);
		}
		stack.push((depth, node));
	}
	while !stack.is_empty() {
		close_top(&mut stack, &mut roots);
	}
	roots
}

/// `needle` occurs in `haystack`; ASCII needles must match a whole word.
fn contains_word(haystack: &str, needle: &str) -> bool {
	if needle.is_ascii() {
		let lowered = haystack.to_lowercase();
		lowered.split(|c: char| !c.is_alphanumeric() || !c.is_ascii()).any(|w| w == needle)
	} else {
		haystack.contains(needle)
	}
}

/// Personal-info field a label refers to, if any
pub fn field_for_label(label: &str) -> Option<FieldKey> {
	FieldKey::ALL.into_iter().find(|key| key.keywords().iter().any(|kw| contains_word(label, kw)))
}

/// Label is little more than a field name, e.g. `性别`, `手机号码：`, `Full name *`.
fn is_field_label(label: &str) -> bool {
	let core = label.trim_matches(|c: char| !c.is_alphanumeric());
	let len = core.chars().count();
	FieldKey::ALL
		.iter()
		.flat_map(|key| key.keywords())
		.any(|kw| contains_word(core, kw) && len <= kw.chars().count() + FIELD_LABEL_SLACK)
}

fn is_question_head(node: &SnapshotNode) -> bool {
	let label = node.label.as_str();
	if label.is_empty() {
		return false;
	}
	let head = match node.role {
		Role::Heading => true,
		Role::Text => label.chars().count() > MIN_TEXT_HEAD_CHARS && !DENY_WORDS.iter().any(|w| contains_word(label, w)),
		_ => false,
	};
	head && !is_field_label(label)
}

/// Choice controls under `nodes`, in document order, not descending into nested question heads.
fn collect_choices<'a>(nodes: &'a [SnapshotNode], out: &mut Vec<&'a SnapshotNode>) {
	for node in nodes {
		if node.role.is_choice() {
			if node.handle.is_some() {
				out.push(node);
			}
		} else if !is_question_head(node) {
			collect_choices(&node.children, out);
		}
	}
}

/// A following sibling that may carry the options of the head before it
fn is_choice_block(node: &SnapshotNode) -> bool {
	match node.role {
		Role::Radio | Role::Checkbox | Role::RadioGroup => true,
		Role::Other(_) if !node.children.is_empty() => {
			let mut found = Vec::new();
			collect_choices(std::slice::from_ref(node), &mut found);
			!found.is_empty() && !contains_head(&node.children)
		}
		_ => false,
	}
}

fn contains_head(nodes: &[SnapshotNode]) -> bool {
	nodes.iter().any(|n| is_question_head(n) || contains_head(&n.children))
}

fn build_question(head: &SnapshotNode, choices: &[&SnapshotNode], ordinal: usize, load: LoadId) -> Question {
	let kind = if choices.iter().any(|c| c.role == Role::Checkbox) { QuestionKind::Multiple } else { QuestionKind::Single };
	let options = choices
		.iter()
		.enumerate()
		.filter_map(|(index, c)| {
			c.handle.as_ref().map(|h| ExamOption {
				text: c.label.clone(),
				handle: PageRef::new(load, h.clone()),
				index,
			})
		})
		.collect();
	Question {
		id: head.handle.clone().unwrap_or_else(|| format!("q{ordinal}")),
		text: head.label.clone(),
		options,
		kind,
	}
}

fn scan_questions(nodes: &[SnapshotNode], load: LoadId, out: &mut Vec<Question>) {
	let mut i = 0;
	while i < nodes.len() {
		let node = &nodes[i];
		if is_question_head(node) {
			let mut choices = Vec::new();
			collect_choices(&node.children, &mut choices);
			let mut consumed = 0;
			if choices.is_empty() {
				for sibling in nodes[i + 1..].iter().take_while(|s| is_choice_block(s)) {
					collect_choices(std::slice::from_ref(sibling), &mut choices);
					consumed += 1;
				}
			}
			if !choices.is_empty() {
				out.push(build_question(node, &choices, out.len(), load));
				i += 1 + consumed;
				continue;
			}
		}
		scan_questions(&node.children, load, out);
		i += 1;
	}
}

/// Questions in document order. Heads that collected no option are dropped.
pub fn extract_questions(tree: &[SnapshotNode], load: LoadId) -> Vec<Question> {
	let mut questions = Vec::new();
	scan_questions(tree, load, &mut questions);
	questions
}

fn walk<'a>(nodes: &'a [SnapshotNode], f: &mut impl FnMut(&'a SnapshotNode)) {
	for node in nodes {
		f(node);
		walk(&node.children, f);
	}
}

/// Free-text inputs whose label (or the nearest text before them) names a known field.
pub fn detect_fields(tree: &[SnapshotNode], load: LoadId) -> Vec<InputField> {
	let mut fields: Vec<InputField> = Vec::new();
	let mut last_text: Option<&str> = None;
	walk(tree, &mut |node| {
		if node.role.is_free_text() {
			let Some(handle) = &node.handle else { return };
			let label = if node.label.is_empty() { last_text.unwrap_or("") } else { node.label.as_str() };
			if let Some(key) = field_for_label(label)
				&& !fields.iter().any(|f| f.key == key)
			{
				fields.push(InputField {
					key,
					label: label.to_string(),
					handle: PageRef::new(load, handle.clone()),
				});
			}
		} else if !node.label.is_empty() && matches!(node.role, Role::Text | Role::Heading | Role::Other(_)) {
			last_text = Some(node.label.as_str());
		}
	});
	fields
}

/// First button that looks like it submits the form
pub fn find_submit(tree: &[SnapshotNode], load: LoadId) -> Option<PageRef> {
	let mut found = None;
	walk(tree, &mut |node| {
		if found.is_none()
			&& node.role == Role::Button
			&& SUBMIT.is_match(&node.label)
			&& let Some(handle) = &node.handle
		{
			found = Some(PageRef::new(load, handle.clone()));
		}
	});
	found
}

/// Everything the engine needs from one page load
#[derive(Clone, Debug)]
pub struct PageModel {
	pub load: LoadId,
	pub questions: Vec<Question>,
	pub fields: Vec<InputField>,
	pub submit: Option<PageRef>,
}

impl PageModel {
	pub fn parse(snapshot: &Snapshot) -> Self {
		let tree = parse_tree(&snapshot.text);
		Self {
			load: snapshot.load,
			questions: extract_questions(&tree, snapshot.load),
			fields: detect_fields(&tree, snapshot.load),
			submit: find_submit(&tree, snapshot.load),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const EXAM: &str = r#"- heading "入职培训考试" [ref=e1] [level=1]
- text "请填写以下信息" [ref=e2]
- textbox "姓名" [ref=e3]
- text "手机号码"
- textbox [ref=e4]
- heading "1. 公司成立于哪一年？" [ref=e5] [level=2]
  - radiogroup [ref=e6]:
    - radio "2001" [ref=e7]
    - radio "2005" [ref=e8]
    - radio "2010" [ref=e9]
- text "2. 以下哪些属于安全规范？" [ref=e10]
- checkbox "佩戴工牌" [ref=e11]
- checkbox "随意外借门禁卡" [ref=e12]
- checkbox "离开锁屏" [ref=e13]
- button "提交" [ref=e14]
"#;

	fn model(text: &str) -> PageModel {
		PageModel::parse(&Snapshot::new(LoadId(7), text))
	}

	#[test]
	fn builds_nested_tree() {
		let tree = parse_tree(EXAM);
		let q1 = tree.iter().find(|n| n.handle.as_deref() == Some("e5")).unwrap();
		assert_eq!(q1.role, Role::Heading);
		assert_eq!(q1.attr("level"), Some("2"));
		assert_eq!(q1.children.len(), 1);
		assert_eq!(q1.children[0].role, Role::RadioGroup);
		assert_eq!(q1.children[0].children.len(), 3);
	}

	#[test]
	fn extracts_questions_with_options() {
		let page = model(EXAM);
		assert_eq!(page.questions.len(), 2);

		let q1 = &page.questions[0];
		assert_eq!(q1.id, "e5");
		assert_eq!(q1.kind, QuestionKind::Single);
		assert_eq!(q1.options.iter().map(|o| o.text.as_str()).collect::<Vec<_>>(), ["2001", "2005", "2010"]);
		assert_eq!(q1.options[2].index, 2);
		assert!(q1.options[0].handle.is_from(LoadId(7)));

		let q2 = &page.questions[1];
		assert_eq!(q2.kind, QuestionKind::Multiple);
		assert_eq!(q2.options.len(), 3);
		assert_eq!(q2.options[1].handle.id(), "e12");
	}

	#[test]
	fn detects_fields_and_submit() {
		let page = model(EXAM);
		let keys: Vec<_> = page.fields.iter().map(|f| f.key).collect();
		assert_eq!(keys, [FieldKey::Name, FieldKey::Phone]);
		assert_eq!(page.fields[1].label, "手机号码");
		assert_eq!(page.fields[1].handle.id(), "e4");
		assert_eq!(page.submit.as_ref().map(|s| s.id()), Some("e14"));
	}

	#[test]
	fn parsing_is_idempotent() {
		let a = model(EXAM);
		let b = model(EXAM);
		assert_eq!(a.questions.len(), b.questions.len());
		for (qa, qb) in a.questions.iter().zip(&b.questions) {
			assert_eq!(qa.id, qb.id);
			assert_eq!(qa.text, qb.text);
			assert_eq!(qa.options.len(), qb.options.len());
		}
	}

	#[test]
	fn options_without_handle_are_ignored() {
		let text = "- heading \"Which colour is the sky?\" [ref=e1]\n  - radio \"Blue\" [ref=e2]\n  - radio \"Decoration\"\n  - radio \"Green\" [ref=e3]\n";
		let page = model(text);
		assert_eq!(page.questions[0].options.len(), 2);
		assert_eq!(page.questions[0].options[1].text, "Green");
	}

	#[test]
	fn short_and_denied_text_does_not_head_questions() {
		let text = "- text \"短题\"\n- radio \"A\" [ref=e1]\n- text \"请选择下面的选项并提交\"\n- radio \"B\" [ref=e2]\n";
		assert!(model(text).questions.is_empty());
	}

	#[test]
	fn personal_info_choices_are_not_questions() {
		let text = "- heading \"性别\" [ref=e1]\n  - radio \"男\" [ref=e2]\n  - radio \"女\" [ref=e3]\n";
		assert!(model(text).questions.is_empty());
	}

	#[test]
	fn section_heading_does_not_swallow_its_questions() {
		let text = r#"- heading "Part one: general knowledge" [ref=e1]
  - heading "Largest planet of the solar system?" [ref=e2]
    - radio "Jupiter" [ref=e3]
    - radio "Mars" [ref=e4]
  - heading "Smallest prime number?" [ref=e5]
    - radio "1" [ref=e6]
    - radio "2" [ref=e7]
"#;
		let page = model(text);
		assert_eq!(page.questions.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(), ["e2", "e5"]);
	}

	#[test]
	fn inline_text_form_and_wrappers() {
		let text = r#"- generic [ref=e1]:
  - text: What does HTTP stand for in networking?
  - generic:
    - radio "HyperText Transfer Protocol" [ref=e2]
    - radio "High Transfer Text Process" [ref=e3]
  - button "Next" [ref=e4]
"#;
		let page = model(text);
		assert_eq!(page.questions.len(), 1);
		assert_eq!(page.questions[0].text, "What does HTTP stand for in networking?");
		assert_eq!(page.questions[0].id, "q0");
		assert_eq!(page.questions[0].options.len(), 2);
		assert_eq!(page.submit.as_ref().map(|s| s.id()), Some("e4"));
	}

	#[test]
	fn garbage_yields_empty_model() {
		for text in ["", "\n\n", "<<<>>>\n\"unterminated\n  ]]] [ref=", "hello world\nthis is prose"] {
			let page = model(text);
			assert!(page.questions.is_empty());
			assert!(page.fields.is_empty());
			assert!(page.submit.is_none());
		}
	}

	#[test]
	fn questions_mentioning_field_words_are_kept() {
		assert!(!is_field_label("1. 公司成立于哪一年？"));
		assert!(!is_field_label("您的性别对工作有影响吗"));
		assert!(is_field_label("性别"));
		assert!(is_field_label("手机号码："));
		assert!(is_field_label("Full name *"));
	}

	#[test]
	fn bracketed_inline_text_is_label() {
		let tree = parse_tree("- paragraph [ref=e3]: Choose [one] answer");
		assert_eq!(tree[0].label, "Choose [one] answer");
		assert_eq!(tree[0].handle.as_deref(), Some("e3"));
	}

	#[test]
	fn ascii_field_keywords_match_whole_words() {
		assert_eq!(field_for_label("Your E-mail"), Some(FieldKey::Email));
		assert_eq!(field_for_label("Full name"), Some(FieldKey::Name));
		assert_eq!(field_for_label("Identity"), None);
		assert_eq!(field_for_label("所在单位"), Some(FieldKey::Dept));
	}
}
