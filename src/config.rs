use std::time::Duration;

use v_utils::macros::{MyConfigPrimitives, Settings};

#[derive(Clone, Debug, Default, MyConfigPrimitives, Settings)]
pub struct AppConfig {
	/// Max learning rounds before giving up and asking for manual review (default: 10)
	#[serde(default = "default_max_loops")]
	pub max_loops: u32,
	/// Grace delay in ms after opening the exam page (default: 3000)
	#[serde(default = "default_settle_ms")]
	pub settle_ms: u64,
	/// Grace delay in ms after the baseline/confirming submit (default: 3000)
	#[serde(default = "default_submit_settle_ms")]
	pub submit_settle_ms: u64,
	/// Grace delay in ms after each trial submit (default: 2000)
	#[serde(default = "default_trial_settle_ms")]
	pub trial_settle_ms: u64,
	/// Max random extra delay in ms added to each trial submit (default: 1000)
	#[serde(default = "default_trial_jitter_ms")]
	pub trial_jitter_ms: u64,
	/// Delay in ms between two clicks or fills (default: 200)
	#[serde(default = "default_click_interval_ms")]
	pub click_interval_ms: u64,
	/// Cool-down in ms between two learning rounds (default: 3000)
	#[serde(default = "default_round_cooldown_ms")]
	pub round_cooldown_ms: u64,
	/// Run with visible browser window (non-headless mode)
	#[serde(default)]
	pub visible: bool,
	/// Directory of the answer cache (default: XDG state dir)
	#[serde(default)]
	pub store_dir: Option<String>,
	/// Command to run on completion/error (receives message as argument)
	#[serde(default)]
	pub stop_hook: Option<String>,
}

fn default_max_loops() -> u32 {
	10
}

fn default_settle_ms() -> u64 {
	3000
}

fn default_submit_settle_ms() -> u64 {
	3000
}

fn default_trial_settle_ms() -> u64 {
	2000
}

fn default_trial_jitter_ms() -> u64 {
	1000
}

fn default_click_interval_ms() -> u64 {
	200
}

fn default_round_cooldown_ms() -> u64 {
	3000
}

/// Fixed waits the engine inserts between driver round-trips
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timings {
	pub settle: Duration,
	pub submit_settle: Duration,
	pub trial_settle: Duration,
	pub trial_jitter: Duration,
	pub click_interval: Duration,
	pub round_cooldown: Duration,
}

impl Timings {
	/// No waiting at all; for fake drivers
	pub const ZERO: Timings = Timings {
		settle: Duration::ZERO,
		submit_settle: Duration::ZERO,
		trial_settle: Duration::ZERO,
		trial_jitter: Duration::ZERO,
		click_interval: Duration::ZERO,
		round_cooldown: Duration::ZERO,
	};
}

impl Default for Timings {
	fn default() -> Self {
		Self {
			settle: Duration::from_millis(default_settle_ms()),
			submit_settle: Duration::from_millis(default_submit_settle_ms()),
			trial_settle: Duration::from_millis(default_trial_settle_ms()),
			trial_jitter: Duration::from_millis(default_trial_jitter_ms()),
			click_interval: Duration::from_millis(default_click_interval_ms()),
			round_cooldown: Duration::from_millis(default_round_cooldown_ms()),
		}
	}
}

impl From<&AppConfig> for Timings {
	fn from(config: &AppConfig) -> Self {
		Self {
			settle: Duration::from_millis(config.settle_ms),
			submit_settle: Duration::from_millis(config.submit_settle_ms),
			trial_settle: Duration::from_millis(config.trial_settle_ms),
			trial_jitter: Duration::from_millis(config.trial_jitter_ms),
			click_interval: Duration::from_millis(config.click_interval_ms),
			round_cooldown: Duration::from_millis(config.round_cooldown_ms),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timings_follow_config() {
		let config = AppConfig {
			settle_ms: 10,
			submit_settle_ms: 20,
			trial_settle_ms: 30,
			trial_jitter_ms: 0,
			click_interval_ms: 5,
			round_cooldown_ms: 40,
			..Default::default()
		};
		let timings = Timings::from(&config);
		assert_eq!(timings.settle, Duration::from_millis(10));
		assert_eq!(timings.trial_jitter, Duration::ZERO);
		assert_eq!(timings.round_cooldown, Duration::from_millis(40));
	}
}
