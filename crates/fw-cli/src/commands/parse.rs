//! Offline log parsing with a per-run summary.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use rayon::prelude::*;

use fw_core::{FahLog, LogFormat, detect_format};

/// Parses each file (in parallel) and writes one summary per file.
pub fn run<W: Write>(writer: &mut W, files: &[PathBuf]) -> Result<()> {
    let parsed: Vec<(&PathBuf, Result<(LogFormat, FahLog)>)> = files
        .par_iter()
        .map(|path| (path, parse_file(path)))
        .collect();

    for (path, result) in parsed {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        match result {
            Ok((format, log)) => render_summary(writer, name, format, &log)?,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "failed to parse log");
                writeln!(writer, "{name}: error: {error:#}")?;
            }
        }
    }
    Ok(())
}

fn parse_file(path: &Path) -> Result<(LogFormat, FahLog)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let format = detect_format(&text);
    Ok((format, FahLog::parse(format, &text)))
}

fn render_summary<W: Write>(
    writer: &mut W,
    name: &str,
    format: LogFormat,
    log: &FahLog,
) -> Result<()> {
    writeln!(writer, "{name} ({format})")?;
    writeln!(writer, "  runs: {}", log.runs.len())?;

    for (i, run) in log.runs.iter().enumerate() {
        let started = run.start_time.map_or_else(
            || "unknown".to_string(),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        writeln!(writer, "  run {}: started {started}", i + 1)?;
        if let Some(version) = &run.client_version {
            writeln!(writer, "    client version: {version}")?;
        }
        for slot_run in run.slot_runs.values() {
            writeln!(
                writer,
                "    slot {:02}: {} completed, {} failed",
                slot_run.slot_id, slot_run.completed_units, slot_run.failed_units
            )?;
            for unit in &slot_run.unit_runs {
                let project = unit.last_project().map_or_else(
                    || "unknown project".to_string(),
                    |p| p.to_string(),
                );
                writeln!(
                    writer,
                    "      WU{:02} {project}: {} frames, {}",
                    unit.queue_index,
                    unit.frames.len(),
                    unit.result
                )?;
            }
        }
    }

    let parse_errors = log.lines().filter(|line| line.data.is_error()).count();
    if parse_errors > 0 {
        writeln!(writer, "  parse errors: {parse_errors}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;

    use insta::assert_snapshot;

    const SAMPLE: &str = "\
*********************** Log Started 2024-03-01T12:00:00Z ***********************
12:04:31:WU01:FS00:Starting
12:04:33:WU01:FS00:0xa7:Project: 16814 (Run 0, Clone 1, Gen 2)
14:55:59:WU01:FS00:FahCore returned: FINISHED_UNIT (100 = 0x64)
";

    fn write_fixture(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{text}").unwrap();
        path
    }

    #[test]
    fn summarizes_a_simple_log() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_fixture(&temp, "sample.log", SAMPLE);

        let mut output = Vec::new();
        run(&mut output, &[path]).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert_snapshot!(output, @r"
        sample.log (fahclient)
          runs: 1
          run 1: started 2024-03-01T12:00:00Z
            slot 00: 1 completed, 0 failed
              WU01 P16814 (R0, C1, G2): 0 frames, finished_unit
        ");
    }

    #[test]
    fn summarizes_multiple_files_in_input_order() {
        let temp = tempfile::tempdir().unwrap();
        let a = write_fixture(&temp, "a.log", SAMPLE);
        let legacy = "\
--- Opening Log file [March 1 12:00:00 UTC]
[12:04:31] Working on queue slot 01 [March 1 12:04:31 UTC]
[12:04:33] Project: 5102 (Run 4, Clone 5, Gen 6)
";
        let b = write_fixture(&temp, "b.log", legacy);

        let mut output = Vec::new();
        run(&mut output, &[a, b]).unwrap();
        let output = String::from_utf8(output).unwrap();

        let a_pos = output.find("a.log (fahclient)").unwrap();
        let b_pos = output.find("b.log (legacy)").unwrap();
        assert!(a_pos < b_pos);
        assert!(output.contains("WU01 P5102 (R4, C5, G6): 0 frames, unknown"));
    }

    #[test]
    fn unreadable_file_reports_error_and_continues() {
        let temp = tempfile::tempdir().unwrap();
        let good = write_fixture(&temp, "good.log", SAMPLE);
        let missing = temp.path().join("missing.log");

        let mut output = Vec::new();
        run(&mut output, &[missing, good]).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("missing.log: error:"));
        assert!(output.contains("good.log (fahclient)"));
    }

    #[test]
    fn counts_parse_errors() {
        let temp = tempfile::tempdir().unwrap();
        let broken = SAMPLE.replace(
            "Project: 16814 (Run 0, Clone 1, Gen 2)",
            "Project: ?? (Run ?, Clone ?, Gen ?)",
        );
        let path = write_fixture(&temp, "broken.log", &broken);

        let mut output = Vec::new();
        run(&mut output, &[path]).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("parse errors: 1"));
    }
}
