use contact_weather_core::{ContactWeather, HostReload, Notification, Notifier, Severity};
use std::sync::atomic::{AtomicBool, Ordering};

/// Terminal stand-in for the page hosting the controller.
#[derive(Debug, Default)]
pub struct TerminalHost {
    reload_requested: AtomicBool,
}

impl TerminalHost {
    /// Returns whether a reload was requested since the last call.
    pub fn take_reload(&self) -> bool {
        self.reload_requested.swap(false, Ordering::SeqCst)
    }
}

impl Notifier for TerminalHost {
    fn notify(&self, notification: Notification) {
        let line = format!(
            "[{}] {}: {}",
            notification.severity.as_str(),
            notification.title,
            notification.message
        );
        match notification.severity {
            Severity::Success => println!("{line}"),
            Severity::Error => eprintln!("{line}"),
        }
    }
}

impl HostReload for TerminalHost {
    fn reload(&self) {
        self.reload_requested.store(true, Ordering::SeqCst);
    }
}

pub fn print_view(ctrl: &ContactWeather) {
    println!("Record:      {}", ctrl.record_id());
    println!("Temperature: {}", or_dash(ctrl.temperature()));
    println!("Captured at: {}", or_dash(ctrl.captured_at()));
}

fn or_dash(value: String) -> String {
    if value.is_empty() { "-".to_string() } else { value }
}
