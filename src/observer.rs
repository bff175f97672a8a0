//! UI bridge - the event contract between the supervisor and a foreground observer

use crate::session::Session;

/// Receiver of session lifecycle events.
///
/// At most one observer is attached to the supervisor at a time; attaching a
/// new one silently replaces the previous attachment, detaching clears it.
/// The supervisor snapshots the attachment once per event and drops the event
/// when nothing is attached - delivery never blocks.
///
/// All methods default to no-ops so observers implement only what they show.
pub trait SessionObserver: Send {
    fn on_text_changed(&self, _session: &Session) {}

    fn on_title_changed(&self, _session: &Session) {}

    /// The session's process has exited. Fired after the supervisor has
    /// applied its auto-removal policy, so the session may already be gone
    /// from the registry.
    fn on_finished(&self, _session: &Session) {}

    fn on_bell(&self, _session: &Session) {}

    fn on_clipboard_text(&self, _session: &Session, _text: &str) {}

    fn on_colors_changed(&self, _session: &Session) {}
}
