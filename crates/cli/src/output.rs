//! Human-readable and JSON rendering of command results.

use alyx_core::Watermark;
use alyx_sync::{Finding, Plan, SyncReport, UnregisteredFile};
use anyhow::Result;
use serde::Serialize;
use serde_json::json;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    let prefix = if report.dry_run { "DRY-RUN: " } else { "" };
    println!("{prefix}channel {}", report.channel);
    println!(
        "datasets examined: {}, sessions planned: {}, skipped datasets: {}",
        report.datasets_examined, report.sessions_planned, report.skipped_datasets
    );
    println!(
        "sessions succeeded: {}, failed: {}, not processed: {}",
        report.sessions_succeeded,
        report.sessions_failed(),
        report.sessions_not_processed
    );
    println!(
        "files added: {}, modified: {}, unchanged: {}, errors: {}",
        report.outcome.added, report.outcome.modified, report.outcome.unchanged, report.outcome.errors
    );
    println!(
        "records created: {}, flags repaired: {}, conflicts: {}, deferred: {}",
        report.bookkeeping.records_created,
        report.bookkeeping.flags_repaired,
        report.conflicts,
        report.deferred
    );
    for failure in &report.failures {
        println!(
            "FAILED session {} {} -> {} (status {}): {}",
            failure.session_id, failure.source, failure.dest, failure.status, failure.command
        );
    }
    if let Some(window) = &report.watermark {
        println!("watermark: {} .. {}", window.started_at, window.finished_at);
    }
    Ok(())
}

pub fn print_plan(plan: &Plan, json: bool) -> Result<()> {
    if json {
        let sessions: Vec<_> = plan
            .sessions
            .iter()
            .map(|s| {
                json!({
                    "session_id": s.session.id,
                    "directory": s.session.relative_dir(),
                    "actions": s.actions,
                })
            })
            .collect();
        return print_json(&json!({
            "datasets_examined": plan.datasets_examined,
            "sessions": sessions,
            "skipped": plan.skipped,
        }));
    }
    if plan.is_empty() {
        println!("Nothing to do ({} datasets examined).", plan.datasets_examined);
    }
    for session in &plan.sessions {
        println!("{} ({})", session.session.relative_dir(), session.session.id);
        for action in &session.actions {
            println!("  {action}");
        }
    }
    for skipped in &plan.skipped {
        println!("skipped {}: {}", skipped.dataset_id, skipped.reason);
    }
    Ok(())
}

pub fn print_findings(findings: &[Finding], json: bool) -> Result<()> {
    if json {
        return print_json(findings);
    }
    if findings.is_empty() {
        println!("No findings.");
    }
    for finding in findings {
        println!("{finding}");
    }
    Ok(())
}

pub fn print_unregistered(files: &[UnregisteredFile], json: bool) -> Result<()> {
    if json {
        return print_json(files);
    }
    for file in files {
        println!("UNREGISTERED {}:{} ({})", file.repository, file.path, file.reason);
    }
    Ok(())
}

pub fn print_watermarks(channel: &str, watermarks: &[Watermark], json: bool) -> Result<()> {
    if json {
        let entries: Vec<_> = watermarks
            .iter()
            .map(|w| json!({ "started_at": w.started_at.to_string(), "finished_at": w.finished_at.to_string() }))
            .collect();
        return print_json(&json!({ "channel": channel, "watermarks": entries }));
    }
    if watermarks.is_empty() {
        println!("No watermarks recorded for {channel}.");
    }
    for w in watermarks {
        println!("{}  {}", w.started_at, w.finished_at);
    }
    Ok(())
}
