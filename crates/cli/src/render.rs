//! Terminal rendering of simulation results

use crate::simulate::{PartState, SimulationSummary};
use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct PartRow {
    part: usize,
    attempts: u32,
    state: String,
    last_latency_ms: u64,
}

#[derive(Tabled)]
struct TotalsRow {
    submitted: usize,
    inserted: usize,
    succeeded: usize,
    retries_used: u32,
    abandoned: usize,
    peak_in_flight: usize,
    duration_ms: i64,
}

pub fn render_summary(summary: &SimulationSummary, show_parts: bool) -> String {
    let mut out = String::new();

    if show_parts {
        let rows: Vec<PartRow> = summary
            .parts
            .iter()
            .map(|p| PartRow {
                part: p.part,
                attempts: p.attempts,
                state: match p.state {
                    PartState::Uploaded => "uploaded".green().to_string(),
                    PartState::Failed => "failed".red().to_string(),
                },
                last_latency_ms: p.last_latency_ms,
            })
            .collect();
        out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        out.push('\n');
    }

    let totals = TotalsRow {
        submitted: summary.report.submitted,
        inserted: summary.inserted,
        succeeded: summary.report.succeeded,
        retries_used: summary.report.retries_used,
        abandoned: summary.report.abandoned,
        peak_in_flight: summary.runner.peak_in_flight,
        duration_ms: summary.report.duration_ms(),
    };
    out.push_str(&Table::new([totals]).with(Style::rounded()).to_string());
    out.push('\n');

    let verdict = if summary.fulfilled {
        format!("Batch {} fulfilled", summary.batch_id).green().bold()
    } else {
        let failed: Vec<String> = summary.failed_units.iter().map(|id| id.to_string()).collect();
        format!(
            "Batch {} rejected (failed units: {})",
            summary.batch_id,
            failed.join(", ")
        )
        .red()
        .bold()
    };
    out.push_str(&verdict.to_string());
    out
}
