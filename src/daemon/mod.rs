//! `watch` mode: poll the mailbox, classify new mail, alert on important.

pub mod notifier;

use anyhow::Result;
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};

use crate::config::WatchConfig;
use crate::domain::{EmailId, Label};
use crate::error::CollaboratorError;
use crate::mail::Mailbox;
use crate::reconcile::LabelReconciler;
use crate::training::{RetrainWorker, TrainingCoordinator, TrainingPhase};

use crate::daemon::notifier::Notify;

const SLEEP_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    pub fetch_count: usize,
    pub notify_important: bool,
    pub auto_label_threshold: Option<f32>,
}

impl DaemonConfig {
    pub fn new(interval_secs: u64, fetch_count: usize, watch: &WatchConfig) -> Self {
        Self {
            interval_secs,
            fetch_count,
            notify_important: watch.notify_important,
            auto_label_threshold: watch.auto_label_threshold,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Messages newer than anything seen in an earlier cycle.
    pub new: usize,
    pub new_important: usize,
    pub auto_labeled: usize,
}

/// One poll of the mailbox. The first cycle only records what is already
/// there; later cycles act on messages with a higher UID.
///
/// Automatic labels go to the mailbox only. They are never appended to the
/// feedback ledger, so the model does not train on its own output.
pub struct Watcher<'a> {
    coordinator: &'a TrainingCoordinator,
    mailbox: &'a dyn Mailbox,
    reconciler: &'a LabelReconciler,
    notifier: &'a dyn Notify,
    cfg: DaemonConfig,
    last_seen: Option<EmailId>,
}

impl<'a> Watcher<'a> {
    pub fn new(
        coordinator: &'a TrainingCoordinator,
        mailbox: &'a dyn Mailbox,
        reconciler: &'a LabelReconciler,
        notifier: &'a dyn Notify,
        cfg: DaemonConfig,
    ) -> Self {
        Self {
            coordinator,
            mailbox,
            reconciler,
            notifier,
            cfg,
            last_seen: None,
        }
    }

    pub fn last_seen(&self) -> Option<EmailId> {
        self.last_seen
    }

    pub fn run_cycle(&mut self) -> Result<CycleReport, CollaboratorError> {
        let emails = self.mailbox.fetch_recent(self.cfg.fetch_count)?;
        let mut report = CycleReport {
            fetched: emails.len(),
            ..Default::default()
        };
        let max_uid = emails.iter().map(|e| e.id).max();

        let Some(last_seen) = self.last_seen else {
            self.last_seen = max_uid;
            info!("watching from UID {}", max_uid.unwrap_or(0));
            return Ok(report);
        };

        let mut fresh: Vec<_> = emails.iter().filter(|e| e.id > last_seen).collect();
        fresh.sort_by(|a, b| b.id.cmp(&a.id));
        report.new = fresh.len();

        for email in fresh {
            let prediction = self.coordinator.classify(email);
            info!(
                "UID {}: {} ({:.0}%) {}",
                email.id,
                prediction.label,
                prediction.confidence * 100.0,
                email.subject
            );

            if prediction.label == Label::Important {
                report.new_important += 1;
                if self.cfg.notify_important
                    && let Err(e) = self.notifier.important_email(email, &prediction)
                {
                    warn!("notify failed for UID {}: {e}", email.id);
                }
            }

            if let Some(threshold) = self.cfg.auto_label_threshold
                && prediction.confidence >= threshold
                && self.reconciler.apply(email.id, prediction.label).is_ok()
            {
                report.auto_labeled += 1;
            }
        }

        if let Some(max_uid) = max_uid {
            self.last_seen = Some(last_seen.max(max_uid));
        }
        Ok(report)
    }
}

/// Poll until Ctrl-C. The current cycle finishes, then any pending retrain
/// is flushed before returning.
pub fn run_watch(
    coordinator: Arc<TrainingCoordinator>,
    mailbox: &dyn Mailbox,
    reconciler: &LabelReconciler,
    notifier: &dyn Notify,
    cfg: DaemonConfig,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    let worker = RetrainWorker::spawn(coordinator.clone())?;
    if coordinator.phase() == TrainingPhase::Stale {
        info!("ledger has feedback newer than the saved model; retraining");
        worker.request();
    }

    let interval = Duration::from_secs(cfg.interval_secs.max(1));
    let mut watcher = Watcher::new(&coordinator, mailbox, reconciler, notifier, cfg);

    while running.load(Ordering::SeqCst) {
        match watcher.run_cycle() {
            Ok(report) if report.new > 0 => info!(
                "{} new, {} important, {} auto-labeled",
                report.new, report.new_important, report.auto_labeled
            ),
            Ok(_) => {}
            Err(e) => warn!("watch cycle failed: {e}"),
        }

        let until = Instant::now() + interval;
        while running.load(Ordering::SeqCst) && Instant::now() < until {
            thread::sleep(SLEEP_STEP);
        }
    }

    info!("stopping; waiting for pending retrain");
    worker.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::classifier::Prediction;
    use crate::domain::EmailRecord;
    use crate::error::PersistenceError;
    use crate::reconcile::LabelNames;
    use crate::store::{FeedbackLedger, MemoryLedger, StateStore};
    use crate::training::{ClassifierState, TrainingOptions};

    struct NullStore;

    impl StateStore for NullStore {
        fn load(&self) -> Result<Option<ClassifierState>, PersistenceError> {
            Ok(None)
        }

        fn save(&self, _state: &ClassifierState) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Inbox {
        emails: Mutex<Vec<EmailRecord>>,
        labels: Mutex<Vec<(EmailId, String)>>,
        fail: AtomicBool,
    }

    impl Inbox {
        fn deliver(&self, email: EmailRecord) {
            self.emails.lock().unwrap().insert(0, email);
        }
    }

    impl Mailbox for Inbox {
        fn fetch_recent(&self, n: usize) -> Result<Vec<EmailRecord>, CollaboratorError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::mailbox("connection reset"));
            }
            Ok(self.emails.lock().unwrap().iter().take(n).cloned().collect())
        }

        fn apply_label(&self, id: EmailId, name: &str) -> Result<(), CollaboratorError> {
            self.labels.lock().unwrap().push((id, name.to_string()));
            Ok(())
        }

        fn mark_read(&self, _id: EmailId) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EmailId>>);

    impl Notify for Recorder {
        fn important_email(&self, email: &EmailRecord, _p: &Prediction) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(email.id);
            Ok(())
        }
    }

    fn email(id: u32, subject: &str, body: &str) -> EmailRecord {
        EmailRecord {
            id,
            message_id: Some(format!("<{id}@watch.test>")),
            sender: "ops@example.com".into(),
            subject: subject.into(),
            body: body.into(),
            date_epoch: 0,
        }
    }

    fn coordinator() -> (TrainingCoordinator, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let c = TrainingCoordinator::start(ledger.clone(), Box::new(NullStore), TrainingOptions::default());
        (c, ledger)
    }

    fn cfg(threshold: Option<f32>) -> DaemonConfig {
        DaemonConfig {
            interval_secs: 1,
            fetch_count: 10,
            notify_important: true,
            auto_label_threshold: threshold,
        }
    }

    #[test]
    fn first_cycle_is_a_baseline() {
        let (c, _) = coordinator();
        let inbox = Inbox::default();
        inbox.deliver(email(4, "Urgent: invoice overdue", "Payment deadline today"));
        inbox.deliver(email(9, "Meeting moved", "Please confirm the new time"));
        let reconciler = LabelReconciler::new(Arc::new(Inbox::default()), LabelNames::default(), false);
        let notes = Recorder::default();

        let mut w = Watcher::new(&c, &inbox, &reconciler, &notes, cfg(Some(0.0)));
        let report = w.run_cycle().unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.new, 0);
        assert_eq!(w.last_seen(), Some(9));
        assert!(notes.0.lock().unwrap().is_empty());
    }

    #[test]
    fn later_cycles_notify_only_new_important_mail() {
        let (c, _) = coordinator();
        let inbox = Inbox::default();
        inbox.deliver(email(1, "Old news", "nothing"));
        let reconciler = LabelReconciler::new(Arc::new(Inbox::default()), LabelNames::default(), false);
        let notes = Recorder::default();
        let mut w = Watcher::new(&c, &inbox, &reconciler, &notes, cfg(None));
        w.run_cycle().unwrap();

        let a = email(2, "Urgent: server outage", "Action required, please respond today");
        let b = email(3, "Limited time offer", "Click here to unsubscribe, free prize");
        let expected: Vec<EmailId> = [&b, &a]
            .into_iter()
            .filter(|e| c.classify(e).label == Label::Important)
            .map(|e| e.id)
            .collect();
        inbox.deliver(a);
        inbox.deliver(b);

        let report = w.run_cycle().unwrap();
        assert_eq!(report.new, 2);
        assert_eq!(report.new_important, expected.len());
        assert_eq!(report.auto_labeled, 0);
        assert_eq!(*notes.0.lock().unwrap(), expected);
        assert_eq!(w.last_seen(), Some(3));

        // Nothing new on the next poll.
        let again = w.run_cycle().unwrap();
        assert_eq!(again.new, 0);
        assert_eq!(notes.0.lock().unwrap().len(), expected.len());
    }

    #[test]
    fn auto_labels_go_to_the_mailbox_not_the_ledger() {
        let (c, ledger) = coordinator();
        let inbox = Inbox::default();
        let labels = Arc::new(Inbox::default());
        let reconciler = LabelReconciler::new(labels.clone(), LabelNames::default(), false);
        let notes = Recorder::default();
        let mut w = Watcher::new(&c, &inbox, &reconciler, &notes, cfg(Some(0.0)));
        w.run_cycle().unwrap();

        inbox.deliver(email(5, "Quarterly report", "Attached for review"));
        let report = w.run_cycle().unwrap();

        assert_eq!(report.auto_labeled, 1);
        let applied = labels.labels.lock().unwrap().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, 5);
        assert_eq!(ledger.len().unwrap(), 0);
        assert_eq!(c.phase(), TrainingPhase::Bootstrapped);
    }

    #[test]
    fn threshold_above_one_never_labels() {
        let (c, _) = coordinator();
        let inbox = Inbox::default();
        let labels = Arc::new(Inbox::default());
        let reconciler = LabelReconciler::new(labels.clone(), LabelNames::default(), false);
        let notes = Recorder::default();
        let mut w = Watcher::new(&c, &inbox, &reconciler, &notes, cfg(Some(1.01)));
        w.run_cycle().unwrap();

        inbox.deliver(email(2, "Hello", "world"));
        assert_eq!(w.run_cycle().unwrap().auto_labeled, 0);
        assert!(labels.labels.lock().unwrap().is_empty());
    }

    #[test]
    fn fetch_failure_keeps_position() {
        let (c, _) = coordinator();
        let inbox = Inbox::default();
        inbox.deliver(email(7, "a", "b"));
        let reconciler = LabelReconciler::new(Arc::new(Inbox::default()), LabelNames::default(), false);
        let notes = Recorder::default();
        let mut w = Watcher::new(&c, &inbox, &reconciler, &notes, cfg(None));
        w.run_cycle().unwrap();

        inbox.fail.store(true, Ordering::SeqCst);
        assert!(w.run_cycle().is_err());
        assert_eq!(w.last_seen(), Some(7));
    }
}
