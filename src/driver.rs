//! Seam between the engine and whatever automates the browser.
//!
//! Handles returned by a snapshot are scoped to one page load. Navigating again
//! (`open`) starts a new load and every older [`PageRef`] becomes invalid.

use std::fmt;

use async_trait::async_trait;
use color_eyre::Result;

/// Identifies one navigation of a driver. Incremented by every `open`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LoadId(pub u64);

impl LoadId {
	pub fn next(self) -> Self {
		LoadId(self.0 + 1)
	}
}

/// Opaque handle to an element of the live page.
///
/// Deliberately not `Serialize`: only option indices are ever persisted.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PageRef {
	load: LoadId,
	id: String,
}

impl PageRef {
	pub fn new(load: LoadId, id: impl Into<String>) -> Self {
		Self { load, id: id.into() }
	}

	pub fn load(&self) -> LoadId {
		self.load
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Whether this handle was produced by the given load.
	pub fn is_from(&self, load: LoadId) -> bool {
		self.load == load
	}
}

impl fmt::Display for PageRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "@{}", self.id)
	}
}

/// Raw snapshot text together with the load it was taken from.
#[derive(Clone, Debug)]
pub struct Snapshot {
	pub load: LoadId,
	pub text: String,
}

impl Snapshot {
	pub fn new(load: LoadId, text: impl Into<String>) -> Self {
		Self { load, text: text.into() }
	}
}

/// Page automation backend.
///
/// Every call is one blocking round-trip; the engine awaits them strictly in order.
#[async_trait]
pub trait PageDriver: Send + Sync {
	/// Navigate to `url`, starting a new load.
	async fn open(&self, url: &str) -> Result<()>;

	/// Indented accessibility-style dump of the current page.
	async fn snapshot(&self) -> Result<Snapshot>;

	async fn click(&self, target: &PageRef) -> Result<()>;

	async fn fill(&self, target: &PageRef, value: &str) -> Result<()>;

	/// Visible text of the whole page, used to read the score after a submit.
	async fn read_page_text(&self) -> Result<String>;

	/// PNG bytes of the current page.
	async fn screenshot(&self) -> Result<Vec<u8>>;
}
