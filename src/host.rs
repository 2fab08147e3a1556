//! Host services the extension uses but does not implement.

/// Opens a server-local path in the host's document area.
pub trait DocumentOpener: Send + Sync {
    fn open(&self, path: &str);
}

/// Non-fatal user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

/// Notifier that only writes to the log. Used when the host has no
/// notification surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_error(&self, message: &str) {
        tracing::error!("{message}");
    }
}
