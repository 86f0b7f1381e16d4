use chrono::{DateTime, Utc};

use crate::model::ProgressUpdate;

fn status_summary(progress: &ProgressUpdate) -> &'static str {
    if progress.total_tasks > 0 && progress.completed_tasks >= progress.total_tasks {
        "Complete"
    } else if progress.completed_tasks == 0 {
        "Not Started"
    } else {
        "In Progress"
    }
}

/// Markdown progress comment posted on the external item.
pub fn progress_comment(record_id: &str, progress: &ProgressUpdate, now: DateTime<Utc>) -> String {
    let mut body = format!("**Progress Update for {record_id}**\n\n");
    body.push_str(&format!(
        "**Status**: {} ({}/{} tasks - {}%)\n\n",
        status_summary(progress),
        progress.completed_tasks.min(progress.total_tasks),
        progress.total_tasks,
        progress.percentage()
    ));

    if !progress.completed.is_empty() {
        body.push_str("## Completed\n\n");
        for task in &progress.completed {
            body.push_str(&format!("- [x] {task}\n"));
        }
        body.push('\n');
    }

    if let Some(note) = progress.note.as_deref().filter(|n| !n.trim().is_empty()) {
        body.push_str(note.trim());
        body.push_str("\n\n");
    }

    body.push_str(&format!("---\nSynced by worksync | {}\n", now.format("%Y-%m-%d")));
    body
}
