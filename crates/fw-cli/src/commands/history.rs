//! History command: completed/failed unit counts per slot.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use fw_db::HistoryDatabase;

pub fn run<W: Write>(
    writer: &mut W,
    db: &HistoryDatabase,
    slot: Option<&str>,
    since: Option<DateTime<Utc>>,
) -> Result<()> {
    let slot_names = match slot {
        Some(slot) => vec![slot.to_string()],
        None => db.slot_names()?,
    };

    writeln!(writer, "Work unit history")?;
    if slot_names.is_empty() {
        writeln!(writer, "No units recorded.")?;
        return Ok(());
    }

    for name in slot_names {
        let completed = db.count_completed(&name, since)?;
        let failed = db.count_failed(&name, since)?;
        writeln!(writer, "- {name}: {completed} completed, {failed} failed")?;
    }
    Ok(())
}
