//! Text formatting for usage figures, shared by the live view and `--summary`.

use crate::{
    ledger::{BreakdownRow, TeamTotals},
    usage::LedgerSnapshot,
};
use std::fmt::Write;

const SEPARATOR: &str = "--------------------------------";

/// Formats a token count with comma digit grouping, e.g. `1,234,567`.
pub fn format_token_count(count: u64) -> String {
    let digits = count.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn format_cost(cost: f64) -> String {
    format!("${:.2}", cost)
}

/// `Tokens: N | Cost: $X.XX` for input plus output tokens.
pub fn format_tokens_and_cost(input_tokens: u64, output_tokens: u64, cost: f64) -> String {
    format!(
        "Tokens: {} | Cost: {}",
        format_token_count(input_tokens.saturating_add(output_tokens)),
        format_cost(cost)
    )
}

/// One-line headline, e.g. `Team Total | Tokens: 4,500 | Cost: $3.00`. The label is
/// left out while nothing has been reported.
pub fn render_compact(totals: &TeamTotals) -> String {
    let usage = &totals.usage;
    let figures = format_tokens_and_cost(usage.input_tokens, usage.output_tokens, usage.cost);
    match totals.label {
        Some(label) => format!("{label} | {figures}"),
        None => figures,
    }
}

/// Plain-text rendering of the session title, the headline total and the per-agent
/// breakdown.
pub fn render_summary(snapshot: &LedgerSnapshot) -> String {
    let ledger = &snapshot.ledger;
    let totals = ledger.render_totals();
    let mut out = format!("{}\n\nTOTAL USAGE", snapshot.session_title());
    if let Some(label) = totals.label {
        let _ = write!(out, " ({label})");
    }
    let _ = writeln!(
        out,
        "\n  {}",
        format_tokens_and_cost(
            totals.usage.input_tokens,
            totals.usage.output_tokens,
            totals.usage.cost
        )
    );
    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("SESSION BREAKDOWN\n");

    let blocks: Vec<String> = ledger
        .session_breakdown_rows()
        .iter()
        .map(format_row_block)
        .collect();
    if blocks.is_empty() {
        out.push_str("  No session usage yet\n");
    } else {
        out.push_str(&blocks.join("\n\n"));
        out.push('\n');
    }
    out
}

fn format_row_block(row: &BreakdownRow) -> String {
    let marker = if row.is_active { " (active)" } else { "" };
    format!(
        "  {}{}\n     {}",
        row.label,
        marker,
        format_tokens_and_cost(row.usage.input_tokens, row.usage.output_tokens, row.usage.cost)
    )
}
