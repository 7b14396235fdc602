//! Human-readable rendering of validation and run results.

use colored::Colorize;
use datasync_migration_core::backup::RESTORE_SCRIPT;
use datasync_migration_core::types::Origin;
use datasync_migration_core::{MigrationConfig, RunReport, RunResult};
use std::fmt::Write;

pub fn print_validated(config: &MigrationConfig) {
    println!("{}", render_validated(config));
}

pub fn print_report(report: &RunReport, config: &MigrationConfig) {
    println!("{}", render_report(report, config));
}

fn render_validated(config: &MigrationConfig) -> String {
    let mut out = format!(
        "{} Configuration is valid: {} migration(s) in {}\n",
        "✓".green(),
        config.migrations.len(),
        config.aws_region
    );
    for (i, migration) in config.migrations.iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{}] s3://{} -> s3://{}",
            i + 1,
            migration.source_bucket,
            migration.destination_bucket
        );
    }
    out
}

fn render_report(report: &RunReport, config: &MigrationConfig) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "{}", format!("Run {}{mode}", report.run_id).bold());
    if let Some(role) = &report.role {
        let origin = match role.origin {
            Origin::PreExisting => "existing",
            Origin::CreatedThisRun => "created",
        };
        let _ = writeln!(out, "IAM role: {} ({origin})", role.identifier);
    }

    for result in &report.results {
        out.push('\n');
        if result.is_success() {
            render_success(&mut out, result, config);
        } else {
            render_failure(&mut out, result);
        }
    }

    let succeeded = report.results.len() - report.failed_count();
    let summary = format!(
        "{succeeded} of {} migration(s) ready",
        report.results.len()
    );
    out.push('\n');
    if report.all_succeeded() {
        out.push_str(&summary.green().to_string());
    } else {
        out.push_str(&summary.red().to_string());
    }
    out
}

fn header(result: &RunResult) -> String {
    format!(
        "[{}] s3://{} -> s3://{}",
        result.index, result.source_bucket, result.destination_bucket
    )
}

fn render_success(out: &mut String, result: &RunResult, config: &MigrationConfig) {
    let _ = writeln!(out, "{} {}", "✓".green(), header(result));
    let Some(resources) = &result.resources else {
        return;
    };
    let _ = writeln!(out, "    Task:                 {} ({})", resources.task_name, resources.task_arn);
    let _ = writeln!(out, "    Source location:      {}", resources.source_location_arn);
    let _ = writeln!(out, "    Destination location: {}", resources.destination_location_arn);
    let _ = writeln!(out, "    Policy statements:    {}", result.merged_sids.join(", "));
    let _ = writeln!(out, "    Backups:              {}", resources.backup_dir.display());
    if !result.dry_run {
        let _ = writeln!(out, "    {}", "Start the transfer with:".dimmed());
        let _ = writeln!(
            out,
            "      aws datasync start-task-execution --task-arn {} --profile {} --region {}",
            resources.task_arn, config.profiles.source, config.aws_region
        );
    }
}

fn render_failure(out: &mut String, result: &RunResult) {
    let Some(failure) = &result.failure else {
        let _ = writeln!(out, "{} {}", "✗".red(), header(result));
        return;
    };
    let _ = writeln!(
        out,
        "{} {} failed at {}: {}",
        "✗".red(),
        header(result),
        failure.stage,
        failure.reason
    );
    if let Some(rollback) = &failure.rollback {
        let _ = writeln!(out, "    Rollback: {rollback}");
    }
    if let Some(dir) = &failure.backup_dir {
        let _ = writeln!(
            out,
            "    Restore bucket policies with: {}",
            dir.join(RESTORE_SCRIPT).display()
        );
    }
}
