//! Clients command: list configured clients.

use std::io::Write;

use anyhow::Result;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    if config.clients.is_empty() {
        writeln!(writer, "No clients configured.")?;
        return Ok(());
    }

    writeln!(writer, "Configured clients:")?;
    for client in &config.clients {
        writeln!(
            writer,
            "- {}: {}:{}",
            client.name, client.server, client.port
        )?;
    }
    Ok(())
}
