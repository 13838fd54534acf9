use std::fmt::Write;

use crate::models::{DashboardResult, SortOrder, SyncSummary};

pub fn build_dashboard_report(class_name: &str, dashboard: &DashboardResult) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Commit Activity Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}) covering {} to {} ({} days)",
        class_name,
        dashboard.group_type,
        dashboard.since.format("%Y-%m-%d %H:%M UTC"),
        dashboard.until.format("%Y-%m-%d %H:%M UTC"),
        dashboard.window_days
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- {} students, {} commits, {:.2} commits on average",
        dashboard.student_count, dashboard.total_commits, dashboard.average_commits
    );
    if let Some(search) = &dashboard.filters.search {
        let _ = writeln!(output, "- search: {search}");
    }
    if let Some(min) = dashboard.filters.min_commits {
        let _ = writeln!(output, "- at least {min} commits");
    }
    if let Some(max) = dashboard.filters.max_commits {
        let _ = writeln!(output, "- at most {max} commits");
    }

    let _ = writeln!(output);
    let direction = match dashboard.sort_order {
        SortOrder::Asc => "ascending",
        SortOrder::Desc => "descending",
    };
    let _ = writeln!(output, "## Students ({direction})");

    if dashboard.students.is_empty() {
        let _ = writeln!(output, "No students match this selection.");
    } else {
        let _ = writeln!(output, "| # | Name | Roll No | Commits | Repository |");
        let _ = writeln!(output, "|---|------|---------|---------|------------|");
        for (rank, row) in dashboard.students.iter().enumerate() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} |",
                rank + 1,
                row.name,
                row.roll_number,
                row.total_commits,
                row.repo_url
            );
        }
    }

    output
}

pub fn format_sync_summary(summary: &SyncSummary) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Processed {} students, upserted {} commits.",
        summary.processed_students, summary.commits_upserted
    );
    if !summary.student_errors.is_empty() {
        let _ = writeln!(output, "{} students failed:", summary.student_errors.len());
        for failure in &summary.student_errors {
            let _ = writeln!(output, "- {} ({}): {}", failure.name, failure.student_id, failure.message);
        }
    }
    output
}
