//! Notification presenters.
//!
//! [`DesktopNotifier`] puts an "Are you awake?" prompt with an "I'm Awake!"
//! action on the desktop. On Linux and the BSDs that is an XDG notification
//! sent through `notify-rust`, whose action is watched on a detached thread;
//! on macOS an `osascript` dialog with a single button; on Windows a
//! PowerShell toast whose button opens the loopback confirm URL.
//! [`LogNotifier`] only writes the prompt to the log, for headless runs.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::errors::{Result, WakeError};
use crate::daemon::confirmation::{ConfirmSource, ConfirmationSignals};

pub const APP_NAME: &str = "Wake Check";
pub const CONFIRM_LABEL: &str = "I'm Awake!";
/// Action key of the confirm button.
pub const CONFIRM_ACTION: &str = "confirm";

/// AUMID of the stock PowerShell host, so toasts show without registering one.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
const POWERSHELL_APP_ID: &str =
    r"{1AC14E77-02E7-4E5D-B744-2EB1AE5198B7}\WindowsPowerShell\v1.0\powershell.exe";

/// One "are you awake?" prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeNotification {
    pub title: String,
    pub message: String,
    pub action_label: String,
    /// Opened by the notification's action button where the platform can
    /// only launch URLs.
    pub confirm_url: String,
    /// How long the prompt stays up; matches the confirmation window.
    pub expires_after: Duration,
}

impl WakeNotification {
    #[must_use]
    pub fn new(duration: Duration, confirm_url: impl Into<String>) -> Self {
        Self {
            title: "Are you awake?".to_string(),
            message: format!(
                "Click the button or your PC will shut down in {}.",
                describe(duration)
            ),
            action_label: CONFIRM_LABEL.to_string(),
            confirm_url: confirm_url.into(),
            expires_after: duration,
        }
    }
}

fn describe(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}

/// Shows a prompt offering one confirm action.
pub trait NotificationPresenter: Send + Sync {
    fn show(&self, notification: &WakeNotification) -> Result<()>;
}

/// Writes the prompt to the log instead of the desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationPresenter for LogNotifier {
    fn show(&self, notification: &WakeNotification) -> Result<()> {
        info!(
            title = %notification.title,
            url = %notification.confirm_url,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Native desktop notification with an "I'm Awake!" action.
///
/// Where the action can be observed in-process it confirms through the
/// shared signals directly, so it keeps working when the loopback port is
/// unavailable.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    #[cfg_attr(target_os = "windows", allow(dead_code))]
    signals: Arc<ConfirmationSignals>,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new(signals: Arc<ConfirmationSignals>) -> Self {
        Self { signals }
    }
}

/// Route an action reported by the desktop. Returns whether it confirmed.
fn handle_action(action: &str, signals: &ConfirmationSignals) -> bool {
    if action == CONFIRM_ACTION || action == "default" {
        signals.confirm(ConfirmSource::Callback);
        true
    } else {
        debug!(action, "notification closed without confirming");
        false
    }
}

fn notify_failed(details: impl Into<String>) -> WakeError {
    WakeError::NotificationFailed {
        details: details.into(),
    }
}

// ──────────────────── XDG (Linux, BSD) ────────────────────

#[cfg(all(unix, not(target_os = "macos")))]
const XDG_SHOW_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(all(unix, not(target_os = "macos")))]
fn xdg_notification(notification: &WakeNotification) -> notify_rust::Notification {
    use notify_rust::{Hint, Timeout, Urgency};

    let expires_ms = u32::try_from(notification.expires_after.as_millis()).unwrap_or(u32::MAX);
    let mut xdg = notify_rust::Notification::new();
    xdg.appname(APP_NAME)
        .summary(&notification.title)
        .body(&notification.message)
        .action(CONFIRM_ACTION, &notification.action_label)
        .hint(Hint::Resident(true))
        .urgency(Urgency::Critical)
        .timeout(Timeout::Milliseconds(expires_ms));
    xdg
}

#[cfg(all(unix, not(target_os = "macos")))]
impl NotificationPresenter for DesktopNotifier {
    fn show(&self, notification: &WakeNotification) -> Result<()> {
        let xdg = xdg_notification(notification);
        let signals = Arc::clone(&self.signals);
        let (shown_tx, shown_rx) = crossbeam_channel::bounded(1);

        // The handle stays on the thread that created it; the thread ends
        // when the prompt is answered, dismissed or expires.
        std::thread::Builder::new()
            .name("wakecheck-notify".to_string())
            .spawn(move || match xdg.show() {
                Ok(handle) => {
                    let _ = shown_tx.send(Ok(()));
                    handle.wait_for_action(|action| {
                        handle_action(action, &signals);
                    });
                }
                Err(err) => {
                    let _ = shown_tx.send(Err(err.to_string()));
                }
            })
            .map_err(|err| notify_failed(format!("spawning notification thread: {err}")))?;

        match shown_rx.recv_timeout(XDG_SHOW_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(details)) => Err(notify_failed(details)),
            Err(_) => Err(notify_failed("notification server did not answer")),
        }
    }
}

// ──────────────────── macOS ────────────────────

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn macos_dialog_script(notification: &WakeNotification) -> String {
    let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "display dialog \"{}\" with title \"{}\" buttons {{\"{}\"}} default button 1 \
         with icon caution giving up after {}",
        quote(&notification.message),
        quote(&notification.title),
        quote(&notification.action_label),
        notification.expires_after.as_secs().max(1),
    )
}

/// `osascript` prints `button returned:<label>, gave up:<bool>`.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn macos_dialog_confirmed(stdout: &str, label: &str) -> bool {
    stdout.contains(&format!("button returned:{label}")) && !stdout.contains("gave up:true")
}

#[cfg(target_os = "macos")]
impl NotificationPresenter for DesktopNotifier {
    fn show(&self, notification: &WakeNotification) -> Result<()> {
        use std::process::{Command, Stdio};

        let child = Command::new("osascript")
            .arg("-e")
            .arg(macos_dialog_script(notification))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| notify_failed(format!("could not run osascript: {err}")))?;
        let signals = Arc::clone(&self.signals);
        let label = notification.action_label.clone();
        std::thread::Builder::new()
            .name("wakecheck-notify".to_string())
            .spawn(move || {
                if let Ok(output) = child.wait_with_output() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if macos_dialog_confirmed(&stdout, &label) {
                        handle_action(CONFIRM_ACTION, &signals);
                    }
                }
            })
            .map_err(|err| notify_failed(format!("spawning notification thread: {err}")))?;
        Ok(())
    }
}

// ──────────────────── Windows ────────────────────

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn windows_script(notification: &WakeNotification) -> String {
    let toast = format!(
        "<toast duration=\"long\"><visual><binding template=\"ToastGeneric\">\
         <text>{}</text><text>{}</text></binding></visual>\
         <audio src=\"ms-winsoundevent:Notification.Default\"/>\
         <actions><action content=\"{}\" activationType=\"protocol\" arguments=\"{}\"/></actions>\
         </toast>",
        xml_escape(&notification.title),
        xml_escape(&notification.message),
        xml_escape(&notification.action_label),
        xml_escape(&notification.confirm_url),
    );
    format!(
        "[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null; \
         [Windows.Data.Xml.Dom.XmlDocument, Windows.Data.Xml.Dom.XmlDocument, ContentType = WindowsRuntime] | Out-Null; \
         $xml = New-Object Windows.Data.Xml.Dom.XmlDocument; \
         $xml.LoadXml('{}'); \
         $toast = New-Object Windows.UI.Notifications.ToastNotification $xml; \
         [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{}').Show($toast)",
        toast.replace('\'', "''"),
        POWERSHELL_APP_ID,
    )
}

#[cfg(target_os = "windows")]
impl NotificationPresenter for DesktopNotifier {
    fn show(&self, notification: &WakeNotification) -> Result<()> {
        use std::process::Command;

        // The toast's protocol action opens the confirm URL, which reaches
        // the signals through the loopback listener.
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(windows_script(notification))
            .output()
            .map_err(|err| notify_failed(format!("could not run powershell: {err}")))?;
        if output.status.success() {
            return Ok(());
        }
        Err(notify_failed(format!(
            "powershell exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
