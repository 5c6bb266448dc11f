//! Mirrors user labels back onto the mailbox.
//!
//! The ledger is the source of truth; mailbox updates are best effort. Each
//! action that succeeded is remembered for the session so repeating a request
//! costs no network round trips, while failed actions are retried the next
//! time the same email is labeled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::domain::{EmailId, Label};
use crate::error::CollaboratorError;
use crate::mail::Mailbox;

/// Mailbox names for each label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelNames {
    pub important: String,
    pub junk: String,
}

impl LabelNames {
    pub fn name(&self, label: Label) -> &str {
        match label {
            Label::Important => &self.important,
            Label::Junk => &self.junk,
        }
    }
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            important: "Triage/Important".to_string(),
            junk: "Triage/Junk".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ReconcileResult {
    Applied,
    /// Every action had already succeeded this session; nothing was sent.
    AlreadyApplied,
    /// Some actions failed. Local state is unaffected.
    SoftFailure { errors: Vec<CollaboratorError> },
}

impl ReconcileResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ReconcileResult::SoftFailure { .. })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Applied {
    label: Option<Label>,
    read: bool,
}

pub struct LabelReconciler {
    mailbox: Arc<dyn Mailbox>,
    names: LabelNames,
    mark_read: bool,
    applied: Mutex<HashMap<EmailId, Applied>>,
    /// Held for a whole `apply`, so the recorded state always matches the
    /// last request that reached the mailbox.
    serial: Mutex<()>,
}

impl LabelReconciler {
    pub fn new(mailbox: Arc<dyn Mailbox>, names: LabelNames, mark_read: bool) -> Self {
        Self {
            mailbox,
            names,
            mark_read,
            applied: Mutex::new(HashMap::new()),
            serial: Mutex::new(()),
        }
    }

    fn recorded(&self, id: EmailId) -> Applied {
        self.applied
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, id: EmailId, update: impl FnOnce(&mut Applied)) {
        let mut applied = self.applied.lock().unwrap_or_else(|p| p.into_inner());
        update(applied.entry(id).or_default());
    }

    /// Apply `label` to `id` in the mailbox, then mark it read if configured.
    ///
    /// Calls are serialized: a second request waits for the first to finish
    /// and then sees what it applied.
    pub fn apply(&self, id: EmailId, label: Label) -> ReconcileResult {
        let _serial = self.serial.lock().unwrap_or_else(|p| p.into_inner());
        let done = self.recorded(id);
        let mut errors = Vec::new();
        let mut sent = false;

        if done.label != Some(label) {
            sent = true;
            let name = self.names.name(label);
            match self.mailbox.apply_label(id, name) {
                Ok(()) => {
                    debug!("UID {id}: applied label {name}");
                    self.record(id, |a| a.label = Some(label));
                }
                Err(e) => {
                    warn!("UID {id}: could not apply label {name}: {e}");
                    errors.push(e);
                }
            }
        }

        if self.mark_read && !done.read {
            sent = true;
            match self.mailbox.mark_read(id) {
                Ok(()) => self.record(id, |a| a.read = true),
                Err(e) => {
                    warn!("UID {id}: could not mark read: {e}");
                    errors.push(e);
                }
            }
        }

        match (sent, errors.is_empty()) {
            (false, _) => ReconcileResult::AlreadyApplied,
            (true, true) => ReconcileResult::Applied,
            (true, false) => ReconcileResult::SoftFailure { errors },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::domain::EmailRecord;

    #[derive(Default)]
    struct CountingMailbox {
        labels: Mutex<Vec<(EmailId, String)>>,
        reads: AtomicUsize,
        fail_labels: AtomicBool,
        slow: AtomicBool,
    }

    impl Mailbox for CountingMailbox {
        fn fetch_recent(&self, _n: usize) -> Result<Vec<EmailRecord>, CollaboratorError> {
            Ok(Vec::new())
        }

        fn apply_label(&self, id: EmailId, name: &str) -> Result<(), CollaboratorError> {
            if self.fail_labels.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Mailbox("offline".into()));
            }
            if self.slow.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            self.labels.lock().unwrap().push((id, name.to_string()));
            Ok(())
        }

        fn mark_read(&self, _id: EmailId) -> Result<(), CollaboratorError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reconciler(mailbox: Arc<CountingMailbox>) -> LabelReconciler {
        LabelReconciler::new(mailbox, LabelNames::default(), true)
    }

    #[test]
    fn repeated_request_has_one_side_effect() {
        let mailbox = Arc::new(CountingMailbox::default());
        let r = reconciler(mailbox.clone());

        assert!(matches!(r.apply(7, Label::Important), ReconcileResult::Applied));
        assert!(matches!(r.apply(7, Label::Important), ReconcileResult::AlreadyApplied));

        assert_eq!(*mailbox.labels.lock().unwrap(), vec![(7, "Triage/Important".to_string())]);
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_label_is_applied() {
        let mailbox = Arc::new(CountingMailbox::default());
        let r = reconciler(mailbox.clone());

        r.apply(7, Label::Important);
        assert!(matches!(r.apply(7, Label::Junk), ReconcileResult::Applied));

        let labels = mailbox.labels.lock().unwrap();
        assert_eq!(labels.last(), Some(&(7, "Triage/Junk".to_string())));
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_requests_settle_on_the_later_label() {
        let mailbox = Arc::new(CountingMailbox::default());
        mailbox.slow.store(true, Ordering::SeqCst);
        let r = Arc::new(reconciler(mailbox.clone()));

        let first = {
            let r = r.clone();
            thread::spawn(move || r.apply(7, Label::Important))
        };
        thread::sleep(Duration::from_millis(10));
        let second = {
            let r = r.clone();
            thread::spawn(move || r.apply(7, Label::Junk))
        };
        assert!(first.join().unwrap().is_ok());
        assert!(second.join().unwrap().is_ok());

        assert_eq!(
            *mailbox.labels.lock().unwrap(),
            vec![(7, "Triage/Important".to_string()), (7, "Triage/Junk".to_string())]
        );
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 1);

        assert!(matches!(r.apply(7, Label::Junk), ReconcileResult::AlreadyApplied));
        assert_eq!(mailbox.labels.lock().unwrap().len(), 2);
    }

    #[test]
    fn failures_are_soft_and_retried() {
        let mailbox = Arc::new(CountingMailbox::default());
        mailbox.fail_labels.store(true, Ordering::SeqCst);
        let r = reconciler(mailbox.clone());

        match r.apply(3, Label::Junk) {
            ReconcileResult::SoftFailure { errors } => assert_eq!(errors.len(), 1),
            other => panic!("expected soft failure, got {other:?}"),
        }
        // Mark-read succeeded and is not repeated.
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 1);

        mailbox.fail_labels.store(false, Ordering::SeqCst);
        assert!(matches!(r.apply(3, Label::Junk), ReconcileResult::Applied));
        assert_eq!(mailbox.labels.lock().unwrap().len(), 1);
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_names_are_used() {
        let mailbox = Arc::new(CountingMailbox::default());
        let names = LabelNames {
            important: "Triage/Keep".into(),
            junk: "Triage/Bin".into(),
        };
        let r = LabelReconciler::new(mailbox.clone(), names, false);
        r.apply(1, Label::Junk);
        assert_eq!(mailbox.labels.lock().unwrap()[0].1, "Triage/Bin");
        assert_eq!(mailbox.reads.load(Ordering::SeqCst), 0);
    }
}
