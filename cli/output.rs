use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use colored::*;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL};
use promptmap_core::{DocumentOrigin, OutputFormat, RunReport, SimilarFile, output_formats};
use serde::Serialize;
use std::io::{self, Write};

use crate::cli_args::FormatOutputOpts;

pub fn print_data<T: Serialize>(
    data: &T,
    format_opts: &FormatOutputOpts,
    default_format: &str,
    root_name: &str,
) -> Result<()> {
    let format_name = format_opts.format.as_deref().unwrap_or(default_format);
    let format = OutputFormat::parse(format_name)?;
    let content = output_formats::serialize(data, format, root_name)?;
    write_to_stdout(&content)
}

pub fn write_to_stdout(content: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(content.as_bytes())
        .context("Failed to write to stdout")?;
    if !content.ends_with('\n') {
        handle
            .write_all(b"\n")
            .context("Failed to write newline to stdout")?;
    }
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}

pub fn readable_size(bytes: u64) -> String {
    Byte::from_u64(bytes)
        .get_appropriate_unit(UnitType::Binary)
        .to_string()
}

#[derive(Debug, Serialize)]
pub struct SnapshotRow {
    pub path: String,
    pub size: u64,
    pub tokens: usize,
}

pub fn print_snapshot_table(project_name: &str, rule_count: usize, rows: &[SnapshotRow]) {
    println!();
    println!("{}", format!(" {} ", project_name).green().bold().underline());
    println!("{:<20} {}", "Ignore rules:".green(), rule_count.to_string().cyan());
    println!("{:<20} {}", "Files:".green(), rows.len().to_string().cyan());
    let total_bytes: u64 = rows.iter().map(|r| r.size).sum();
    let total_tokens: usize = rows.iter().map(|r| r.tokens).sum();
    println!("{:<20} {}", "Total size:".green(), readable_size(total_bytes).cyan());
    println!("{:<20} {}", "Tokens:".green(), total_tokens.to_string().cyan());

    if rows.is_empty() {
        println!("\n{}", "(No files survived the ignore rules)".yellow());
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Path").fg(Color::Green),
        Cell::new("Size").fg(Color::Green),
        Cell::new("Tokens").fg(Color::Green),
    ]);
    for row in rows {
        table.add_row(vec![
            Cell::new(&row.path).fg(Color::Cyan),
            Cell::new(readable_size(row.size))
                .set_alignment(CellAlignment::Right)
                .fg(Color::DarkGrey),
            Cell::new(row.tokens).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");
    println!();
}

pub fn print_similar_table(title: &str, results: &[SimilarFile]) {
    println!();
    println!("{}", format!(" {} ", title).green().bold().underline());
    if results.is_empty() {
        println!("{}", "(No similar files found)".yellow());
        println!();
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Path").fg(Color::Green),
        Cell::new("Similarity").fg(Color::Green),
        Cell::new("Preview").fg(Color::Green),
    ]);
    for result in results {
        let preview: String = result
            .content
            .chars()
            .take(80)
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        table.add_row(vec![
            Cell::new(&result.path).fg(Color::Cyan),
            Cell::new(format!("{:.3}", result.similarity)).set_alignment(CellAlignment::Right),
            Cell::new(preview).fg(Color::DarkGrey),
        ]);
    }
    println!("{table}");
    println!();
}

pub fn print_run_summary(report: &RunReport) {
    println!();
    println!("{}", " Run Summary ".green().bold().underline());
    println!(
        "{:<20} {}",
        "Files scanned:".green(),
        report.snapshot.len().to_string().cyan()
    );
    println!(
        "{:<20} {} ({:?})",
        "Files selected:".green(),
        report.selection.len().to_string().cyan(),
        report.selection.origin
    );
    println!(
        "{:<20} {}",
        "Files loaded:".green(),
        report.load.accepted.len().to_string().cyan()
    );
    if let Some(stopped) = &report.load.stopped_at {
        println!("{:<20} {}", "Budget stop at:".yellow(), stopped);
    }
    println!(
        "{:<20} {} / {}",
        "Prompt tokens:".green(),
        report.load.total_tokens.to_string().cyan(),
        report.load.ceiling
    );
    if report.indexed_files > 0 {
        println!(
            "{:<20} {}",
            "Indexed files:".green(),
            report.indexed_files.to_string().cyan()
        );
    }
    println!(
        "{:<20} {} calls, {} tokens",
        "Ledger:".green(),
        report.totals.api_calls,
        report.totals.total_tokens().to_string().cyan()
    );
    match report.origin {
        DocumentOrigin::Generated => println!(
            "{} Document written to: {}",
            "✅".green(),
            report.output_path.display().to_string().blue()
        ),
        DocumentOrigin::Fallback => println!(
            "{} Fallback document written to: {}",
            "⚠️".yellow(),
            report.output_path.display().to_string().blue()
        ),
    }
    println!();
}
