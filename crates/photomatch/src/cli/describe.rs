//! The `photomatch describe` command.

use clap::Args;
use console::Style;
use photomatch_core::{Config, PhotoMatch};

/// Arguments for the `describe` command.
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Marketplace item id (e.g. v1|123456789|0)
    pub item_id: String,
}

/// Execute the describe command.
pub async fn execute(args: DescribeArgs, config: Config) -> anyhow::Result<()> {
    let item_id = args.item_id.trim();
    if item_id.is_empty() {
        anyhow::bail!("Item id must not be empty");
    }

    let matcher = PhotoMatch::new(config)?;
    let description = matcher.describe(item_id).await;

    if description.is_empty() {
        let warn = Style::new().for_stderr().yellow();
        eprintln!(
            "{}",
            warn.apply_to(format!("No description available for {item_id}"))
        );
    } else {
        println!("{description}");
    }
    Ok(())
}
