use anyhow::Result;

use super::context::CliContext;

pub fn run() -> Result<()> {
    let context = CliContext::load()?;
    let ledger = context.recent_ledger();

    if ledger.is_empty() {
        println!("No recently closed panels.");
        return Ok(());
    }

    for item in ledger.items() {
        println!(
            "{:<24} {:<32} {}",
            item.id.to_string(),
            item.title,
            item.closed_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
