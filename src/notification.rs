//! Presence notification derivation

/// What the foreground-presence notification should currently say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

/// Derive the presence notification from the current session set, background
/// task count and lock state. Total over its inputs; recomputed on every
/// change rather than cached.
pub fn presence_notification(session_count: usize, task_count: usize, lock_held: bool) -> Notification {
    let mut text = format!(
        "{} session{}",
        session_count,
        if session_count == 1 { "" } else { "s" }
    );
    if task_count > 0 {
        text.push_str(&format!(
            ", {} task{}",
            task_count,
            if task_count == 1 { "" } else { "s" }
        ));
    }
    if lock_held {
        text.push_str(" (wake lock held)");
    }

    // Holding a lock means power/network is in active use, so the
    // notification is elevated while it lasts.
    let priority = if lock_held { Priority::High } else { Priority::Low };

    Notification { text, priority }
}
