//! Artifact export — JSON report, equity CSV, and rebalance-log CSV.
//!
//! All persisted reports include a `schema_version` field. Unknown versions
//! are rejected on load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pitlab_core::domain::{EquityPoint, RebalanceEvent, RebalanceTrigger};

use crate::runner::{SimulationReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `SimulationReport` to pretty JSON.
pub fn export_json(report: &SimulationReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize SimulationReport to JSON")
}

/// Deserialize a `SimulationReport` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<SimulationReport> {
    let report: SimulationReport =
        serde_json::from_str(json).context("failed to deserialize SimulationReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export an equity curve as CSV with date and equity columns.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "equity"])?;
    for p in equity_curve {
        wtr.write_record([&p.date.to_string(), &format!("{:.2}", p.equity)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the rebalance log as CSV, one row per event.
///
/// Columns: date, trigger, trades, traded_notional, total_cost, turnover,
/// value_before, value_after, cash_after, scale_factor, liquidated
///
/// `trades` lists signed share changes as `TICKER:+N;TICKER:-M`.
pub fn export_rebalance_csv(events: &[RebalanceEvent]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "date",
        "trigger",
        "trades",
        "traded_notional",
        "total_cost",
        "turnover",
        "value_before",
        "value_after",
        "cash_after",
        "scale_factor",
        "liquidated",
    ])?;

    for e in events {
        wtr.write_record([
            &e.date.to_string(),
            trigger_label(e.trigger),
            &format_trades(&e.trades),
            &format!("{:.2}", e.traded_notional),
            &format!("{:.2}", e.total_cost),
            &format!("{:.6}", e.turnover()),
            &format!("{:.2}", e.value_before),
            &format!("{:.2}", e.value_after),
            &format!("{:.2}", e.cash_after),
            &format!("{:.6}", e.scale_factor),
            &e.liquidated.join(";"),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn format_trades(trades: &BTreeMap<String, i64>) -> String {
    trades
        .iter()
        .map(|(ticker, delta)| format!("{ticker}:{delta:+}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn trigger_label(trigger: RebalanceTrigger) -> &'static str {
    match trigger {
        RebalanceTrigger::Forced => "FORCED",
        RebalanceTrigger::Scheduled => "SCHEDULED",
        RebalanceTrigger::Opportunistic => "OPPORTUNISTIC",
    }
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single run.
///
/// Creates `run_{hash prefix}/` under `output_dir` containing:
/// - `report.json` — the full `SimulationReport`
/// - `equity.csv` — day-by-day equity curve
/// - `rebalances.csv` — rebalance log
///
/// Returns the path to the created directory.
pub fn save_artifacts(report: &SimulationReport, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = report.config_hash.chars().take(12).collect();
    let run_dir = output_dir.join(format!("run_{prefix}"));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("report.json", export_json(report)?),
        ("equity.csv", export_equity_csv(&report.result.equity_curve)?),
        ("rebalances.csv", export_rebalance_csv(&report.result.events)?),
    ];
    for (name, contents) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(run_dir)
}

/// Load a `SimulationReport` from an artifact directory's report.json.
pub fn load_artifacts(dir: &Path) -> Result<SimulationReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}
