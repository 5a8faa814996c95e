//! [`PageDriver`] over a live Chromium tab.
//!
//! Snapshots are produced by an in-page script that tags every interesting element with a
//! `data-exam-ref` attribute and prints the indented line format understood by
//! [`crate::snapshot`]. Refs are re-assigned on every snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chromiumoxide::{Page, page::ScreenshotParams};
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};

use crate::driver::{LoadId, PageDriver, PageRef, Snapshot};

const SNAPSHOT_SCRIPT: &str = r#"
(function() {
	const INTERACTIVE = 'input,select,textarea,button,a[href],h1,h2,h3,h4,h5,h6,fieldset,[role]';
	const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'SVG', 'HEAD']);
	const clean = s => (s || '').replace(/\s+/g, ' ').trim();
	const quote = s => JSON.stringify(clean(s));
	const shown = el => el === document.body || el.offsetParent !== null || getComputedStyle(el).position === 'fixed';

	document.querySelectorAll('[data-exam-ref]').forEach(el => el.removeAttribute('data-exam-ref'));
	let counter = 0;
	const tag = el => {
		const ref = 'e' + (++counter);
		el.setAttribute('data-exam-ref', ref);
		return ref;
	};

	// labels of radios and checkboxes become the option text, not standalone text
	const optionLabels = new Set();
	const optionText = new Map();
	document.querySelectorAll('input[type=radio], input[type=checkbox]').forEach(input => {
		const labels = Array.from(input.labels || []);
		const wrapping = input.closest('label');
		if (wrapping && !labels.includes(wrapping)) labels.push(wrapping);
		labels.forEach(l => optionLabels.add(l));
		let text = labels.map(l => l.innerText).join(' ');
		if (!clean(text)) {
			const next = input.nextElementSibling;
			if (next && !next.matches(INTERACTIVE)) {
				optionLabels.add(next);
				text = next.innerText;
			}
		}
		optionText.set(input, clean(text) || input.getAttribute('aria-label') || input.value || '');
	});

	const roleOf = el => {
		const aria = (el.getAttribute('role') || '').toLowerCase();
		if (['radiogroup', 'radio', 'checkbox', 'button', 'heading', 'textbox', 'combobox', 'link', 'group'].includes(aria)) return aria;
		const t = el.tagName.toLowerCase();
		if (/^h[1-6]$/.test(t)) return 'heading';
		if (t === 'button') return 'button';
		if (t === 'a' && el.hasAttribute('href')) return 'link';
		if (t === 'select') return 'combobox';
		if (t === 'textarea') return 'textbox';
		if (t === 'fieldset') return 'group';
		if (t === 'input') {
			const type = (el.getAttribute('type') || 'text').toLowerCase();
			if (type === 'radio') return 'radio';
			if (type === 'checkbox') return 'checkbox';
			if (type === 'submit' || type === 'button') return 'button';
			if (['hidden', 'file', 'image', 'reset'].includes(type)) return null;
			return 'textbox';
		}
		return null;
	};

	const labelOf = (el, role) => {
		if (optionText.has(el)) return optionText.get(el);
		switch (role) {
			case 'textbox':
			case 'combobox':
				return el.getAttribute('aria-label') || el.getAttribute('placeholder') || (el.labels && el.labels[0] ? el.labels[0].innerText : '');
			case 'button':
				return el.innerText || el.value || el.getAttribute('aria-label') || '';
			case 'group':
			case 'radiogroup':
				return el.getAttribute('aria-label') || '';
			default:
				return el.innerText || el.getAttribute('aria-label') || '';
		}
	};

	const out = [];
	const line = (depth, role, label, attrs, container) => {
		let s = '  '.repeat(depth) + '- ' + role;
		if (clean(label)) s += ' ' + quote(label);
		for (const a of attrs) s += ' [' + a + ']';
		if (container) s += ':';
		out.push(s);
	};

	const walk = (el, depth) => {
		if (SKIP.has(el.tagName)) return;
		const role = roleOf(el);
		if (role) {
			const attrs = ['ref=' + tag(el)];
			if (role === 'heading') attrs.push('level=' + (el.tagName.match(/\d/) || ['2'])[0]);
			if (el.checked) attrs.push('checked');
			const container = role === 'group' || role === 'radiogroup';
			line(depth, role, labelOf(el, role), attrs, container);
			if (container) {
				for (const child of el.children) walk(child, depth + 1);
			}
			return;
		}
		if (optionLabels.has(el)) {
			for (const child of el.children) walk(child, depth);
			return;
		}
		if (!el.querySelector(INTERACTIVE)) {
			if (shown(el) && clean(el.innerText)) line(depth, 'text', el.innerText, [], false);
			return;
		}
		const own = clean(Array.from(el.childNodes).filter(n => n.nodeType === 3).map(n => n.textContent).join(' '));
		if (own && shown(el)) line(depth, 'text', own, [], false);
		for (const child of el.children) walk(child, depth);
	};

	if (document.body) walk(document.body, 0);
	return out.join('\n');
})()
"#;

/// Drives one Chromium tab
pub struct ChromiumDriver {
	page: Page,
	load: AtomicU64,
}

impl ChromiumDriver {
	pub fn new(page: Page) -> Self {
		Self { page, load: AtomicU64::new(0) }
	}

	pub fn page(&self) -> &Page {
		&self.page
	}

	fn current_load(&self) -> LoadId {
		LoadId(self.load.load(Ordering::SeqCst))
	}

	fn ensure_live(&self, target: &PageRef) -> Result<()> {
		let current = self.current_load();
		if !target.is_from(current) {
			bail!("stale handle {} from load {} (page is at load {})", target, target.load().0, current.0);
		}
		Ok(())
	}

	fn selector(target: &PageRef) -> String {
		format!(r#"[data-exam-ref="{}"]"#, target.id())
	}
}

/// Escape a string for embedding in a double-quoted JavaScript literal
fn js_string(s: &str) -> String {
	s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n").replace('\r', "\\r")
}

#[async_trait]
impl PageDriver for ChromiumDriver {
	async fn open(&self, url: &str) -> Result<()> {
		self.page.goto(url).await.map_err(|e| eyre!("Failed to navigate to {}: {}", url, e))?;
		let load = self.load.fetch_add(1, Ordering::SeqCst) + 1;
		tracing::debug!(url, load, "page opened");
		Ok(())
	}

	async fn snapshot(&self) -> Result<Snapshot> {
		let load = self.current_load();
		let result = self.page.evaluate(SNAPSHOT_SCRIPT).await.map_err(|e| eyre!("Failed to snapshot page: {}", e))?;
		let text = result.value().and_then(|v| v.as_str()).ok_or_else(|| eyre!("Snapshot script returned no text"))?;
		Ok(Snapshot::new(load, text))
	}

	async fn click(&self, target: &PageRef) -> Result<()> {
		self.ensure_live(target)?;
		let selector = Self::selector(target);

		// native click first; styled exam widgets often hide the real input, so fall back to a DOM click
		if let Ok(element) = self.page.find_element(&selector).await {
			match element.click().await {
				Ok(_) => return Ok(()),
				Err(e) => tracing::debug!(%target, error = %e, "native click failed, falling back to DOM click"),
			}
		}

		let script = format!(
			r#"
			(function() {{
				const el = document.querySelector('[data-exam-ref="{}"]');
				if (el) {{ el.click(); return true; }}
				return false;
			}})()
			"#,
			js_string(target.id())
		);
		let result = self.page.evaluate(script).await.map_err(|e| eyre!("Failed to click {}: {}", target, e))?;
		if result.value().and_then(|v| v.as_bool()) != Some(true) {
			bail!("Element {} not found", target);
		}
		Ok(())
	}

	async fn fill(&self, target: &PageRef, value: &str) -> Result<()> {
		self.ensure_live(target)?;
		let script = format!(
			r#"
			(function() {{
				const el = document.querySelector('[data-exam-ref="{}"]');
				if (!el) return false;
				const value = "{}";
				if (el.tagName === 'SELECT') {{
					const option = Array.from(el.options).find(o => o.text.includes(value) || o.value === value);
					if (!option) return false;
					el.value = option.value;
				}} else {{
					el.focus();
					el.value = value;
				}}
				el.dispatchEvent(new Event('input', {{ bubbles: true }}));
				el.dispatchEvent(new Event('change', {{ bubbles: true }}));
				return true;
			}})()
			"#,
			js_string(target.id()),
			js_string(value)
		);
		let result = self.page.evaluate(script).await.map_err(|e| eyre!("Failed to fill {}: {}", target, e))?;
		if result.value().and_then(|v| v.as_bool()) != Some(true) {
			bail!("Could not fill {}", target);
		}
		Ok(())
	}

	async fn read_page_text(&self) -> Result<String> {
		let result = self
			.page
			.evaluate("document.body ? document.body.innerText : ''")
			.await
			.map_err(|e| eyre!("Failed to read page text: {}", e))?;
		Ok(result.value().and_then(|v| v.as_str()).unwrap_or_default().to_string())
	}

	async fn screenshot(&self) -> Result<Vec<u8>> {
		self.page
			.screenshot(ScreenshotParams::builder().full_page(true).build())
			.await
			.map_err(|e| eyre!("Failed to take screenshot: {}", e))
	}
}
