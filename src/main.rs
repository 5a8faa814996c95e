use std::path::PathBuf;

use chromiumoxide::{
	Page,
	browser::{Browser, BrowserConfig},
};
use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::eyre};
use exam_autopilot::{
	ExamEngine, ExamOptions, FieldKey, UserInputs,
	browser::ChromiumDriver,
	config::{AppConfig, SettingsFlags, Timings},
	store::{AnswerStore, FileKv},
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use v_utils::{elog, log};

#[derive(Parser)]
#[command(name = "exam_autopilot")]
#[command(about = "Learns exam answers from the score a page reports, and replays them", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	#[command(flatten)]
	settings: SettingsFlags,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// List the fillable fields and count the questions of a page
	Analyze { url: String },
	/// Answer an exam, replaying cached answers or learning them
	Run {
		url: String,
		/// Value for a personal-info field, e.g. `--field name=张三` (keys: name, phone, dept, company, email, address, idcard, age, gender)
		#[arg(short, long = "field", value_parser = parse_field)]
		fields: Vec<(FieldKey, String)>,
		/// Where to write the PNG of the result page
		#[arg(long)]
		screenshot: Option<PathBuf>,
	},
	/// Show how many exams are cached
	Stats,
	/// Forget every learned exam
	Clear,
}

fn parse_field(s: &str) -> Result<(FieldKey, String), String> {
	let (key, value) = s.split_once('=').ok_or_else(|| format!("expected key=value, got '{s}'"))?;
	Ok((key.parse()?, value.to_string()))
}

/// Run the stop hook with a message if configured
fn run_stop_hook(config: &AppConfig, message: &str) {
	if let Some(ref hook) = config.stop_hook {
		log!("Running stop hook: {} {:?}", hook, message);
		// Escape single quotes for shell: replace ' with '\''
		let escaped = message.replace('\'', "'\\''");
		let _ = tokio::process::Command::new("sh").arg("-c").arg(format!("{} '{}'", hook, escaped)).spawn();
	}
}

fn open_store(config: &AppConfig) -> Result<FileKv> {
	match &config.store_dir {
		Some(dir) => FileKv::open(dir),
		None => default_store(),
	}
}

#[cfg(feature = "xdg")]
fn default_store() -> Result<FileKv> {
	FileKv::in_state_dir()
}

#[cfg(not(feature = "xdg"))]
fn default_store() -> Result<FileKv> {
	Err(eyre!("No store_dir configured and built without the `xdg` feature"))
}

async fn launch_browser(visible: bool) -> Result<(Browser, JoinHandle<()>, Page)> {
	let config = if visible {
		BrowserConfig::builder().with_head().build()
	} else {
		BrowserConfig::builder().build()
	}
	.map_err(|e| eyre!("Failed to build browser config: {}", e))?;

	let (browser, mut handler) = Browser::launch(config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;

	// Consume browser events so the connection does not stall; they are mostly noise
	let handle = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

	let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {}", e))?;
	Ok((browser, handle, page))
}

async fn close_browser(mut browser: Browser, handle: JoinHandle<()>) {
	if let Err(e) = browser.close().await {
		elog!("Failed to close browser: {}", e);
	}
	handle.abort();
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive("exam_autopilot=info".parse()?))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	let config = AppConfig::try_build(cli.settings).map_err(|e| eyre!("Failed to load config: {}", e))?;

	match cli.command {
		Commands::Stats => {
			let stats = AnswerStore::new(open_store(&config)?).stats()?;
			let last = stats.last_update.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string());
			println!("cached exams: {}\nlast update: {}", stats.total, last);
		}
		Commands::Clear => {
			AnswerStore::new(open_store(&config)?).clear()?;
			log!("Answer cache cleared");
		}
		Commands::Analyze { url } => {
			let (browser, handle, page) = launch_browser(config.visible).await?;
			let engine = ExamEngine::new(ChromiumDriver::new(page), open_store(&config)?, Timings::from(&config));
			let analysis = engine.analyze_page(&url).await;
			close_browser(browser, handle).await;

			let analysis = analysis?;
			println!("{}: {} question(s)", analysis.url, analysis.question_count);
			for field in &analysis.fields {
				println!("  {:<8} {} ({})", field.key.as_str(), field.label, field.key.label());
			}
		}
		Commands::Run { url, fields, screenshot } => {
			let inputs: UserInputs = fields.into_iter().collect();
			let (browser, handle, page) = launch_browser(config.visible).await?;
			let engine = ExamEngine::new(ChromiumDriver::new(page), open_store(&config)?, Timings::from(&config));

			let cancel = CancellationToken::new();
			let on_ctrl_c = cancel.clone();
			tokio::spawn(async move {
				if tokio::signal::ctrl_c().await.is_ok() {
					log!("Interrupted, stopping after the current step...");
					on_ctrl_c.cancel();
				}
			});

			let options = ExamOptions {
				max_loops: config.max_loops,
				cancel,
				..Default::default()
			};
			let outcome = engine.auto_exam(&url, &inputs, &options).await;

			if config.visible && outcome.success {
				log!("Browser is visible. Press Ctrl+C to exit...");
				options.cancel.cancelled().await;
			}
			close_browser(browser, handle).await;

			if let (Some(path), Some(png)) = (&screenshot, &outcome.screenshot) {
				match std::fs::write(path, png) {
					Ok(()) => {
						log!("Saved screenshot to: {}", path.display());
					}
					Err(e) => {
						elog!("Failed to write screenshot {}: {}", path.display(), e);
					}
				}
			}

			let summary = format!("[{}] {}", outcome.status, outcome.message);
			if outcome.success {
				log!("{}", summary);
			} else {
				elog!("{}", summary);
			}
			if let Some(exam) = &outcome.learned_exam {
				for (i, question) in exam.questions.iter().enumerate() {
					let answers: Vec<String> = question.correct_option_indices.iter().map(|idx| (idx + 1).to_string()).collect();
					let mark = if exam.perfect || question.resolved { "" } else { " (unconfirmed)" };
					println!("{:>3}. {} -> {}{}", i + 1, question.text, answers.join(","), mark);
				}
			}
			run_stop_hook(&config, &summary);

			if !outcome.success {
				std::process::exit(1);
			}
		}
	}

	Ok(())
}
