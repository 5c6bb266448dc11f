use anyhow::Result;
use notify_rust::Notification;

use crate::classifier::Prediction;
use crate::domain::EmailRecord;
use crate::mail::decoders::normalize_snippet;

/// Where watch-mode alerts go.
pub trait Notify {
    fn important_email(&self, email: &EmailRecord, prediction: &Prediction) -> Result<()>;
}

/// Desktop notifications through the platform notification service.
pub struct DesktopNotifier;

impl Notify for DesktopNotifier {
    fn important_email(&self, email: &EmailRecord, prediction: &Prediction) -> Result<()> {
        let mut n = Notification::new();
        n.summary(&format!("{}: {}", email.sender, email.subject))
            .body(&format!(
                "{}\n(important, {:.0}% sure)",
                normalize_snippet(&email.body, 140),
                prediction.confidence * 100.0
            ))
            .appname("mail_triage");
        #[cfg(all(unix, not(target_os = "macos")))]
        n.hint(notify_rust::Hint::Category("email.arrived".to_string()));

        // A missing notification daemon should not stop the watch loop.
        if let Err(e) = n.show() {
            log::warn!("notification error: {e}");
        }
        Ok(())
    }
}
