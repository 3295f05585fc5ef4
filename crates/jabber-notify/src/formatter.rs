//! Message text for a triggered execution.

use crate::event::ExecutionEvent;

/// Format the notification line.
///
/// `[SUCCESS] infra/build run by alice: http://x/1`
pub fn format_message(trigger: &str, event: &ExecutionEvent) -> String {
    format!(
        "[{}] {} run by {}: {}",
        trigger.to_uppercase(),
        event.job.display_path(),
        event.user,
        event.href
    )
}
