//! The `photomatch search` command.

use clap::{Args, ValueEnum};
use console::Style;
use photomatch_core::{
    BatchEvent, BatchReport, Config, ListingSummary, PhotoMatch, SlotSnapshot, SlotState,
    SLOT_COUNT,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Supported output formats.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable listing per image
    Text,
    /// One JSON document with every slot
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Arguments for the `search` command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Photos to match (up to five; extras are ignored)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Maximum listings per photo (overrides marketplace.result_limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Fetch the description of each photo's top listing
    #[arg(long)]
    pub describe: bool,
}

/// One slot as written by `--format json`.
#[derive(Debug, Serialize)]
struct SlotOutput<'a> {
    path: &'a Path,
    #[serde(flatten)]
    slot: SlotSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected: Option<ListingSummary>,
}

#[derive(Debug, Serialize)]
struct SearchOutput<'a> {
    report: &'a BatchReport,
    slots: Vec<SlotOutput<'a>>,
}

/// Execute the search command.
pub async fn execute(args: SearchArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(limit) = args.limit {
        if limit == 0 {
            anyhow::bail!("--limit must be greater than 0");
        }
        config.marketplace.result_limit = limit;
    }

    let paths = take_batch(args.paths);
    let matcher = PhotoMatch::new(config)?;

    let mut events = matcher.subscribe();
    let handle = matcher.submit(paths.clone())?;
    let generation = handle.generation();
    let total = paths.len();
    let show_progress = args.format == OutputFormat::Text;

    let progress = tokio::spawn(async move {
        let dim = Style::new().for_stderr().dim();
        let mut settled = 0;
        while let Ok(event) = events.recv().await {
            match event {
                BatchEvent::SlotSettled { generation: g, slot } if g == generation => {
                    settled += 1;
                    if show_progress {
                        eprintln!(
                            "  {}",
                            dim.apply_to(format!("Image {} done ({settled}/{total})", slot + 1))
                        );
                    }
                }
                BatchEvent::BatchCompleted(_) | BatchEvent::BatchFailed { .. } => break,
                _ => {}
            }
        }
    });

    let report = match handle.wait().await {
        Ok(report) => report,
        Err(e) => {
            progress.abort();
            return Err(e.into());
        }
    };
    let _ = progress.await;

    let mut slots = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let Some(slot) = matcher.slot_snapshot(index) else {
            continue;
        };
        let selected = match (args.describe, slot.hits.first()) {
            (true, Some(top)) => Some(matcher.select(index, &top.item_id).await?),
            _ => None,
        };
        slots.push(SlotOutput {
            path,
            slot,
            selected,
        });
    }

    match args.format {
        OutputFormat::Json => {
            let output = SearchOutput {
                report: &report,
                slots,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for slot in &slots {
                print!("{}", render_slot(slot.path, &slot.slot, slot.selected.as_ref()));
            }
            print_summary(&report);
        }
    }

    if report.all_failed() {
        anyhow::bail!("All {} searches failed", report.dispatched);
    }
    Ok(())
}

/// Keep at most one batch worth of paths, expanding `~`.
fn take_batch(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = paths
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()))
        .collect();
    if paths.len() > SLOT_COUNT {
        tracing::warn!(
            "{} photos given; only the first {SLOT_COUNT} will be searched",
            paths.len()
        );
        paths.truncate(SLOT_COUNT);
    }
    paths
}

/// Render one slot as a block of text.
fn render_slot(path: &Path, slot: &SlotSnapshot, selected: Option<&ListingSummary>) -> String {
    let heading = Style::new().bold();
    let muted = Style::new().dim();
    let error = Style::new().red();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        heading.apply_to(format!("Image {}:", slot.index + 1)),
        path.display()
    );

    match slot.state {
        SlotState::Failed => {
            let message = slot.error.as_deref().unwrap_or("search failed");
            let _ = writeln!(out, "  {}", error.apply_to(format!("Error: {message}")));
        }
        _ if slot.hits.is_empty() => {
            let _ = writeln!(out, "  {}", muted.apply_to("(No results)"));
        }
        _ => {
            for (rank, hit) in slot.hits.iter().enumerate() {
                let _ = writeln!(out, "  {}. {hit}", rank + 1);
                if !hit.web_url.is_empty() {
                    let _ = writeln!(out, "     {}", muted.apply_to(&hit.web_url));
                }
            }
        }
    }

    if let Some(summary) = selected {
        let description = if summary.description.is_empty() {
            "(unavailable)"
        } else {
            summary.description.as_str()
        };
        let _ = writeln!(out, "  Description: {description}");
    }
    out.push('\n');
    out
}

fn print_summary(report: &BatchReport) {
    eprintln!(
        "  {} searched in {:.1}s: {} with results, {} empty, {} failed",
        report.dispatched,
        report.elapsed.as_secs_f64(),
        report.succeeded,
        report.empty,
        report.failed
    );
}
