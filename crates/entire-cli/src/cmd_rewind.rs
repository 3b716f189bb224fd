use std::path::Path;

use entire_checkpoint::{PointKind, RewindError, RewindPoint, RewindReport};

use crate::workspace::Workspace;

/// `entire rewind [--list] [--json] [<id>]`
pub fn execute(cwd: &Path, target: Option<&str>, list: bool, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    let engine = ws.engine()?;

    let target = match target {
        Some(t) if !list => t,
        _ => {
            let points = engine.rewind_points()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                print_points(&points);
            }
            return Ok(());
        }
    };

    ws.require_enabled()?;
    match engine.rewind(target) {
        Ok(report) => {
            print_report(&report);
            println!("Rewound to {target}");
            Ok(())
        }
        Err(e) => {
            if let Some(RewindError::Partial { failures, report }) = e.downcast_ref::<RewindError>() {
                print_report(report);
                for failure in failures {
                    eprintln!("  failed  {failure}");
                }
            }
            Err(e)
        }
    }
}

fn print_points(points: &[RewindPoint]) {
    if points.is_empty() {
        println!("No rewind points.");
        return;
    }
    for p in points {
        let kind = match p.kind {
            PointKind::Checkpoint => "checkpoint",
            PointKind::Temporary => "snapshot",
        };
        let id = if p.kind == PointKind::Checkpoint {
            p.id.as_str()
        } else {
            &p.commit[..p.commit.len().min(12)]
        };
        let files = p.files_touched.len().max(p.deltas.len());
        println!(
            "{id:<12}  {kind:<10}  {}  {}  ({files} files)",
            entire_core::format_rfc3339(p.created_at),
            p.message
        );
    }
}

fn print_report(report: &RewindReport) {
    for path in &report.restored {
        println!("  restored  {path}");
    }
    for path in &report.deleted {
        println!("  deleted   {path}");
    }
    for path in &report.skipped {
        println!("  skipped   {path} (protected)");
    }
}
