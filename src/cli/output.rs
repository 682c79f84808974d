//! Output formatting for CLI commands.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::metrics::Stats;
use crate::training::EpochRecord;

/// Output mode for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

/// Print a single item as pretty-printed JSON.
pub fn output_json<T: Serialize>(item: &T) {
    match serde_json::to_string_pretty(item) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize to JSON: {}", e)),
    }
}

fn build_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(headers);
    for row in rows {
        table.add_row(row);
    }
    table
}

/// Print a formatted table with headers and rows.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        println!("{}", "No results found.".dimmed());
        return;
    }
    println!("{}", build_table(headers, rows));
}

pub fn print_success(msg: &str) {
    println!("{} {}", "OK".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "Error:".red().bold(), msg);
}

pub fn print_header(title: &str) {
    println!("\n{}\n", title.bold());
}

pub fn print_kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

fn stats_rows(stats: &Stats) -> Vec<Vec<String>> {
    stats
        .entries()
        .into_iter()
        .map(|(name, value)| vec![name.to_string(), format!("{:.3}", value)])
        .collect()
}

/// Metrics as a two-column table, or JSON.
pub fn print_stats(title: &str, stats: &Stats, mode: OutputMode) {
    match mode {
        OutputMode::Json => output_json(&serde_json::json!({ "name": title, "stats": stats })),
        OutputMode::Human => {
            print_header(title);
            print_table(&["Metric", "Value"], stats_rows(stats));
        }
    }
}

fn format_loss(loss: Option<f32>) -> String {
    loss.map_or_else(|| "-".to_string(), |l| format!("{:.6}", l))
}

/// Per-epoch training summary.
pub fn print_epochs(records: &[EpochRecord], mode: OutputMode) {
    match mode {
        OutputMode::Json => output_json(&records),
        OutputMode::Human => {
            let rows = records
                .iter()
                .map(|r| {
                    vec![
                        r.epoch.to_string(),
                        format_loss(r.train_loss),
                        format_loss(r.test_loss),
                        format!("{:.8}", r.learning_rate),
                        r.global_step.to_string(),
                        format!("{:.1}s", r.elapsed_secs),
                    ]
                })
                .collect();
            print_table(
                &["Epoch", "Train loss", "Test loss", "LR", "Step", "Time"],
                rows,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::statistics;
    use ndarray::arr2;

    #[test]
    fn test_stats_rows_sorted_with_three_decimals() {
        let pred = arr2(&[[1u8, 0], [0, 1]]);
        let truth = arr2(&[[1u8, 0], [1, 0]]);
        let stats = statistics(pred.view(), truth.view(), false).unwrap();
        let rows = stats_rows(&stats);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0], vec!["accuracy".to_string(), "0.500".to_string()]);
        let names: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_format_missing_loss() {
        assert_eq!(format_loss(None), "-");
        assert_eq!(format_loss(Some(0.25)), "0.250000");
    }
}
