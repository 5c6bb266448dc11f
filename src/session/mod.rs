//! One interactive triage session: fetch, classify, summarize, label.
//!
//! Network calls (mailbox, summarizer, label reconciliation) run on helper
//! threads and report back through [`Session::next_event`]. Labeling appends
//! to the ledger before it returns; only the mailbox mirror is deferred.
//! Mailbox label updates go through a single queue, so they reach the
//! mailbox in the order the user gave them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::classifier::Prediction;
use crate::config::RetrainPolicy;
use crate::domain::{EmailId, EmailRecord, Label};
use crate::error::{CollaboratorError, SessionError, SummarizationError};
use crate::mail::Mailbox;
use crate::reconcile::{LabelReconciler, ReconcileResult};
use crate::summarize::Summarizer;
use crate::training::{RetrainWorker, TrainingCoordinator, TrainingPhase};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub fetch_count: usize,
    pub retrain: RetrainPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            fetch_count: 5,
            retrain: RetrainPolicy::Eager,
        }
    }
}

/// An email together with its current prediction and any user label.
#[derive(Debug, Clone)]
pub struct ClassifiedEmail {
    pub email: EmailRecord,
    pub prediction: Prediction,
    pub feedback: Option<Label>,
}

/// Something finished in the background.
#[derive(Debug)]
pub enum SessionEvent {
    Refreshed { count: usize },
    RefreshFailed(CollaboratorError),
    Summary {
        id: EmailId,
        result: Result<String, SummarizationError>,
    },
    Reconciled {
        id: EmailId,
        label: Label,
        result: ReconcileResult,
    },
}

enum Message {
    Fetched(Result<Vec<EmailRecord>, CollaboratorError>),
    Event(SessionEvent),
}

pub struct Session {
    coordinator: Arc<TrainingCoordinator>,
    worker: Option<RetrainWorker>,
    reconcile_tx: Sender<(EmailId, Label)>,
    mailbox: Arc<dyn Mailbox>,
    summarizer: Arc<dyn Summarizer>,
    options: SessionOptions,
    emails: Vec<ClassifiedEmail>,
    summaries: HashMap<EmailId, String>,
    classified_with: u64,
    refreshing: bool,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Session {
    pub fn new(
        coordinator: Arc<TrainingCoordinator>,
        mailbox: Arc<dyn Mailbox>,
        reconciler: Arc<LabelReconciler>,
        summarizer: Arc<dyn Summarizer>,
        options: SessionOptions,
    ) -> std::io::Result<Self> {
        let worker = RetrainWorker::spawn(coordinator.clone())?;
        let (tx, rx) = mpsc::channel();
        let reconcile_tx = spawn_reconciler(reconciler, tx.clone())?;
        let classified_with = coordinator.snapshot().version;
        Ok(Self {
            coordinator,
            worker: Some(worker),
            reconcile_tx,
            mailbox,
            summarizer,
            options,
            emails: Vec::new(),
            summaries: HashMap::new(),
            classified_with,
            refreshing: false,
            tx,
            rx,
        })
    }

    pub fn emails(&self) -> &[ClassifiedEmail] {
        &self.emails
    }

    pub fn email(&self, index: usize) -> Option<&ClassifiedEmail> {
        self.emails.get(index)
    }

    pub fn summary(&self, id: EmailId) -> Option<&str> {
        self.summaries.get(&id).map(String::as_str)
    }

    pub fn coordinator(&self) -> &TrainingCoordinator {
        &self.coordinator
    }

    pub fn phase(&self) -> TrainingPhase {
        self.coordinator.phase()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    /// Fetch and classify synchronously.
    pub fn refresh(&mut self) -> Result<usize, CollaboratorError> {
        let emails = self.mailbox.fetch_recent(self.options.fetch_count)?;
        Ok(self.install(emails))
    }

    /// Fetch on a helper thread; completion arrives as an event.
    pub fn start_refresh(&mut self) {
        if self.refreshing {
            return;
        }
        self.refreshing = true;
        let mailbox = self.mailbox.clone();
        let n = self.options.fetch_count;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(Message::Fetched(mailbox.fetch_recent(n)));
        });
    }

    fn install(&mut self, emails: Vec<EmailRecord>) -> usize {
        let snapshot = self.coordinator.snapshot();
        self.classified_with = snapshot.version;
        let previous: HashMap<EmailId, Label> = self
            .emails
            .iter()
            .filter_map(|c| c.feedback.map(|l| (c.email.id, l)))
            .collect();
        self.emails = emails
            .into_iter()
            .map(|email| ClassifiedEmail {
                prediction: snapshot.classify_text(&email.classification_text()),
                feedback: previous.get(&email.id).copied(),
                email,
            })
            .collect();
        info!(
            "classified {} emails with classifier v{}",
            self.emails.len(),
            snapshot.version
        );
        self.emails.len()
    }

    /// Re-score the listed emails if a retrain has replaced the model.
    pub fn reclassify_if_updated(&mut self) -> bool {
        let snapshot = self.coordinator.snapshot();
        if snapshot.version == self.classified_with {
            return false;
        }
        for c in &mut self.emails {
            c.prediction = snapshot.classify_text(&c.email.classification_text());
        }
        debug!("re-scored {} emails with classifier v{}", self.emails.len(), snapshot.version);
        self.classified_with = snapshot.version;
        true
    }

    /// Record the user's label for the email at `index`.
    ///
    /// The ledger append is complete on return. The mailbox is updated in
    /// the background and a retrain is requested when the policy is eager.
    pub fn label(&mut self, index: usize, label: Label) -> Result<u64, SessionError> {
        let entry = self
            .emails
            .get_mut(index)
            .ok_or(SessionError::NoSuchEmail(index + 1))?;
        let seq = self.coordinator.record_feedback(&entry.email, label)?;
        entry.feedback = Some(label);

        if self.reconcile_tx.send((entry.email.id, label)).is_err() {
            warn!("label mirror thread has stopped; mailbox not updated");
        }

        if self.options.retrain == RetrainPolicy::Eager
            && let Some(worker) = &self.worker
        {
            worker.request();
        }
        Ok(seq)
    }

    /// Summarize the email at `index` in the background. Cached summaries are
    /// delivered immediately.
    pub fn request_summary(&mut self, index: usize) -> Result<(), SessionError> {
        let entry = self.emails.get(index).ok_or(SessionError::NoSuchEmail(index + 1))?;
        let id = entry.email.id;
        if let Some(cached) = self.summaries.get(&id) {
            let _ = self.tx.send(Message::Event(SessionEvent::Summary {
                id,
                result: Ok(cached.clone()),
            }));
            return Ok(());
        }

        let body = entry.email.body.clone();
        let summarizer = self.summarizer.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = summarizer.summarize(&body);
            let _ = tx.send(Message::Event(SessionEvent::Summary { id, result }));
        });
        Ok(())
    }

    /// Wait up to `timeout` for the next background completion.
    pub fn next_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let message = match self.rx.recv_timeout(timeout) {
            Ok(m) => m,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        };
        Some(match message {
            Message::Fetched(Ok(emails)) => {
                self.refreshing = false;
                SessionEvent::Refreshed {
                    count: self.install(emails),
                }
            }
            Message::Fetched(Err(e)) => {
                self.refreshing = false;
                warn!("refresh failed: {e}");
                SessionEvent::RefreshFailed(e)
            }
            Message::Event(SessionEvent::Summary { id, result }) => {
                if let Ok(text) = &result {
                    self.summaries.insert(id, text.clone());
                }
                SessionEvent::Summary { id, result }
            }
            Message::Event(event) => event,
        })
    }

    /// End the session. A stale model is retrained and persisted before this
    /// returns; any retrain already queued completes first.
    pub fn finish(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.wait_idle();
        if self.coordinator.phase() == TrainingPhase::Stale {
            info!("retraining on this session's feedback before exit");
            worker.request();
        }
        worker.shutdown();
    }
}

/// One thread applies label updates in request order. It exits once the
/// session drops its sender; an update still in flight is abandoned.
fn spawn_reconciler(
    reconciler: Arc<LabelReconciler>,
    events: Sender<Message>,
) -> std::io::Result<Sender<(EmailId, Label)>> {
    let (tx, rx) = mpsc::channel::<(EmailId, Label)>();
    thread::Builder::new()
        .name("reconcile".to_string())
        .spawn(move || {
            for (id, label) in rx {
                let result = reconciler.apply(id, label);
                let event = SessionEvent::Reconciled { id, label, result };
                if events.send(Message::Event(event)).is_err() {
                    break;
                }
            }
        })?;
    Ok(tx)
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::PersistenceError;
    use crate::reconcile::LabelNames;
    use crate::store::{FeedbackLedger, MemoryLedger, StateStore};
    use crate::summarize::DisabledSummarizer;
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
    struct FixedMailbox {
        emails: Vec<EmailRecord>,
        labels: Mutex<Vec<(EmailId, String)>>,
    }

    impl Mailbox for FixedMailbox {
        fn fetch_recent(&self, n: usize) -> Result<Vec<EmailRecord>, CollaboratorError> {
            Ok(self.emails.iter().take(n).cloned().collect())
        }

        fn apply_label(&self, id: EmailId, name: &str) -> Result<(), CollaboratorError> {
            self.labels.lock().unwrap().push((id, name.to_string()));
            Ok(())
        }

        fn mark_read(&self, _id: EmailId) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    fn email(id: u32, subject: &str, body: &str) -> EmailRecord {
        EmailRecord {
            id,
            message_id: Some(format!("<{id}@session.test>")),
            sender: "sender@example.com".into(),
            subject: subject.into(),
            body: body.into(),
            date_epoch: 0,
        }
    }

    fn session(policy: RetrainPolicy) -> (Session, Arc<MemoryLedger>, Arc<FixedMailbox>) {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = Arc::new(TrainingCoordinator::start(
            ledger.clone(),
            Box::new(NullStore),
            TrainingOptions::default(),
        ));
        let mailbox = Arc::new(FixedMailbox {
            emails: vec![
                email(3, "Server outage tonight", "Please acknowledge the maintenance window"),
                email(2, "Huge savings inside", "Click now, unsubscribe anytime"),
                email(1, "Lunch?", "Tacos at noon"),
            ],
            ..Default::default()
        });
        let reconciler = Arc::new(LabelReconciler::new(mailbox.clone(), LabelNames::default(), true));
        let session = Session::new(
            coordinator,
            mailbox.clone(),
            reconciler,
            Arc::new(DisabledSummarizer::new("TEST_KEY")),
            SessionOptions {
                fetch_count: 2,
                retrain: policy,
            },
        )
        .unwrap();
        (session, ledger, mailbox)
    }

    fn wait_for<F: Fn(&SessionEvent) -> bool>(s: &mut Session, pred: F) -> SessionEvent {
        loop {
            let event = s.next_event(Duration::from_secs(5)).expect("event");
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn refresh_respects_fetch_count() {
        let (mut s, _, _) = session(RetrainPolicy::Eager);
        assert_eq!(s.refresh().unwrap(), 2);
        assert_eq!(s.emails()[0].email.id, 3);
        assert!(s.emails().iter().all(|c| c.feedback.is_none()));
    }

    #[test]
    fn background_refresh_reports_count() {
        let (mut s, _, _) = session(RetrainPolicy::Eager);
        s.start_refresh();
        assert!(s.is_refreshing());
        let event = wait_for(&mut s, |e| matches!(e, SessionEvent::Refreshed { .. }));
        assert!(matches!(event, SessionEvent::Refreshed { count: 2 }));
        assert!(!s.is_refreshing());
    }

    #[test]
    fn label_appends_before_returning_and_reconciles() {
        let (mut s, ledger, mailbox) = session(RetrainPolicy::SessionEnd);
        s.refresh().unwrap();

        s.label(1, Label::Junk).unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
        assert_eq!(s.phase(), TrainingPhase::Stale);
        assert_eq!(s.emails()[1].feedback, Some(Label::Junk));

        let event = wait_for(&mut s, |e| matches!(e, SessionEvent::Reconciled { .. }));
        assert!(matches!(
            event,
            SessionEvent::Reconciled {
                id: 2,
                label: Label::Junk,
                result: ReconcileResult::Applied
            }
        ));
        assert_eq!(mailbox.labels.lock().unwrap()[0], (2, "Triage/Junk".to_string()));
    }

    #[test]
    fn relabels_reach_the_mailbox_in_order() {
        let (mut s, _, mailbox) = session(RetrainPolicy::SessionEnd);
        s.refresh().unwrap();

        s.label(0, Label::Important).unwrap();
        s.label(0, Label::Junk).unwrap();
        let mut results = Vec::new();
        while results.len() < 2 {
            if let SessionEvent::Reconciled { label, result, .. } =
                wait_for(&mut s, |e| matches!(e, SessionEvent::Reconciled { .. }))
            {
                results.push((label, result.is_ok()));
            }
        }
        assert_eq!(results, vec![(Label::Important, true), (Label::Junk, true)]);
        assert_eq!(
            *mailbox.labels.lock().unwrap(),
            vec![(3, "Triage/Important".to_string()), (3, "Triage/Junk".to_string())]
        );

        // The latest label is what the session remembers as applied.
        s.label(0, Label::Junk).unwrap();
        let event = wait_for(&mut s, |e| matches!(e, SessionEvent::Reconciled { .. }));
        assert!(matches!(
            event,
            SessionEvent::Reconciled {
                result: ReconcileResult::AlreadyApplied,
                ..
            }
        ));
        assert_eq!(mailbox.labels.lock().unwrap().len(), 2);
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        let (mut s, ledger, _) = session(RetrainPolicy::Eager);
        s.refresh().unwrap();
        assert!(matches!(s.label(9, Label::Important), Err(SessionError::NoSuchEmail(10))));
        assert_eq!(ledger.len().unwrap(), 0);
    }

    #[test]
    fn finish_retrains_stale_model() {
        let (mut s, _, _) = session(RetrainPolicy::SessionEnd);
        s.refresh().unwrap();
        s.label(0, Label::Important).unwrap();
        s.label(1, Label::Junk).unwrap();
        let coordinator = s.coordinator.clone();
        assert_eq!(coordinator.phase(), TrainingPhase::Stale);

        s.finish();
        assert_eq!(coordinator.phase(), TrainingPhase::Ready);
        assert_eq!(coordinator.retrain_attempts(), 1);
    }

    #[test]
    fn eager_policy_retrains_and_rescoring_follows() {
        let (mut s, _, _) = session(RetrainPolicy::Eager);
        s.refresh().unwrap();
        s.label(0, Label::Important).unwrap();
        s.label(1, Label::Junk).unwrap();
        if let Some(worker) = &s.worker {
            worker.wait_idle();
        }
        assert_eq!(s.phase(), TrainingPhase::Ready);
        assert!(s.reclassify_if_updated());
        assert_eq!(s.emails()[0].prediction.label, Label::Important);
        assert_eq!(s.emails()[1].prediction.label, Label::Junk);
    }

    #[test]
    fn summary_failure_is_an_event() {
        let (mut s, _, _) = session(RetrainPolicy::Eager);
        s.refresh().unwrap();
        s.request_summary(0).unwrap();
        let event = wait_for(&mut s, |e| matches!(e, SessionEvent::Summary { .. }));
        assert!(matches!(
            event,
            SessionEvent::Summary {
                id: 3,
                result: Err(SummarizationError::NotConfigured(_))
            }
        ));
        assert!(s.summary(3).is_none());
    }
}
