use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, info, warn};

use crate::classifier::{self, FeatureVector, FitOptions, LabeledVector, Prediction, TrainOptions, Vocabulary};
use crate::domain::{EmailRecord, Fingerprint, Label};
use crate::error::{LedgerError, TrainingError, ValidationError};
use crate::store::{FeedbackLedger, NewExample, StateStore};
use crate::training::bootstrap;
use crate::training::state::{ClassifierState, StateOrigin, TrainingPhase};

#[derive(Debug, Clone, Default)]
pub struct TrainingOptions {
    pub fit: FitOptions,
    pub train: TrainOptions,
}

/// Summary of a successful retrain.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainOutcome {
    pub version: u64,
    pub vocab_version: u64,
    /// Distinct fingerprints the model was fitted on.
    pub examples: usize,
    /// Examples skipped because their vector predates the vocabulary in use
    /// and no source text was kept to re-extract them.
    pub excluded: usize,
    /// Ledger entries skipped because they could not be decoded.
    pub unreadable: usize,
    pub persisted: bool,
    pub phase: TrainingPhase,
}

/// A fitted state plus what went into it.
struct Fit {
    state: ClassifierState,
    examples: usize,
    excluded: usize,
    unreadable: usize,
}

/// Latest view of one fingerprint across the ledger.
struct Group {
    label: Label,
    counts: [u32; 2],
    vector: FeatureVector,
    text: Option<String>,
}

impl Group {
    fn weight(&self) -> f32 {
        self.counts[slot(self.label)] as f32
    }
}

fn slot(label: Label) -> usize {
    match label {
        Label::Junk => 0,
        Label::Important => 1,
    }
}

/// Owns the classifier state and drives its lifecycle.
///
/// Predictions read an immutable `Arc` snapshot, so classification never
/// waits on a retrain. Retrains are serialized; the snapshot is swapped only
/// once a new fit has fully succeeded.
pub struct TrainingCoordinator {
    ledger: Arc<dyn FeedbackLedger>,
    store: Box<dyn StateStore>,
    options: TrainingOptions,
    current: RwLock<Arc<ClassifierState>>,
    phase: Mutex<TrainingPhase>,
    retrain_lock: Mutex<()>,
    attempts: AtomicU64,
}

impl TrainingCoordinator {
    /// Load the persisted state, or bootstrap one.
    ///
    /// A missing or unreadable state file means a cold start; it is logged
    /// and never fails the session.
    pub fn start(ledger: Arc<dyn FeedbackLedger>, store: Box<dyn StateStore>, options: TrainingOptions) -> Self {
        let loaded = match store.load() {
            Ok(Some(state)) => Some(state),
            Ok(None) => {
                info!("no saved classifier state; starting cold");
                None
            }
            Err(e) => {
                warn!("could not load classifier state ({e}); starting cold");
                None
            }
        };

        if let Some(state) = loaded {
            let last = ledger.last_seq().unwrap_or_else(|e| {
                warn!("could not read feedback ledger: {e}");
                0
            });
            let phase = if last > state.trained_through {
                TrainingPhase::Stale
            } else {
                TrainingPhase::Ready
            };
            info!(
                "loaded classifier v{} ({} terms), phase {phase}",
                state.version,
                state.vocabulary.len()
            );
            return Self::with_state(ledger, store, options, state, phase);
        }

        let state = Self::bootstrap_from_ledger(ledger.as_ref(), &options);
        info!(
            "phase {} -> {}: fitted on built-in examples (v{})",
            TrainingPhase::Cold,
            TrainingPhase::Bootstrapped,
            state.version
        );
        let coordinator = Self::with_state(ledger, store, options, state, TrainingPhase::Bootstrapped);

        if coordinator.ledger_has_both_labels() {
            // Failures were already logged; the bootstrap model stays active.
            let _ = coordinator.retrain();
        }
        coordinator
    }

    fn with_state(
        ledger: Arc<dyn FeedbackLedger>,
        store: Box<dyn StateStore>,
        options: TrainingOptions,
        state: ClassifierState,
        phase: TrainingPhase,
    ) -> Self {
        Self {
            ledger,
            store,
            options,
            current: RwLock::new(Arc::new(state)),
            phase: Mutex::new(phase),
            retrain_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Synthetic table plus whatever labeled text the ledger already holds.
    fn bootstrap_from_ledger(ledger: &dyn FeedbackLedger, options: &TrainingOptions) -> ClassifierState {
        let mut extra: Vec<(String, Label)> = Vec::new();
        let mut max_version = 0u64;
        for row in ledger.all() {
            match row {
                Ok(ex) => {
                    max_version = max_version.max(ex.vector.vocab_version);
                    if let Some(text) = ex.source_text {
                        extra.push((text, ex.label));
                    }
                }
                Err(e @ LedgerError::CorruptRow { .. }) => {
                    warn!("bootstrap skipped a ledger entry: {e}");
                }
                Err(e) => {
                    warn!("stopped reading the ledger during bootstrap: {e}");
                    break;
                }
            }
        }
        let extra: Vec<(&str, Label)> = extra.iter().map(|(t, l)| (t.as_str(), *l)).collect();
        // Start above every version already in the ledger so old vectors
        // are never mistaken for current ones.
        bootstrap::bootstrap_state(&extra, options, max_version + 1)
    }

    fn ledger_has_both_labels(&self) -> bool {
        let mut seen = [false; 2];
        // Corrupt entries are skipped; a failed read ends the walk.
        for ex in self.ledger.all().filter_map(Result::ok) {
            seen[slot(ex.label)] = true;
            if seen[0] && seen[1] {
                return true;
            }
        }
        false
    }

    fn phase_guard(&self) -> MutexGuard<'_, TrainingPhase> {
        self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn phase(&self) -> TrainingPhase {
        *self.phase_guard()
    }

    /// Read-only view of the active classifier.
    pub fn snapshot(&self) -> Arc<ClassifierState> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn ledger(&self) -> &dyn FeedbackLedger {
        self.ledger.as_ref()
    }

    /// Number of retrains attempted since start, successful or not.
    pub fn retrain_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn classify(&self, email: &EmailRecord) -> Prediction {
        self.snapshot().classify_text(&email.classification_text())
    }

    /// Classify a precomputed vector against the active model.
    pub fn predict_vector(&self, vector: &FeatureVector) -> Result<Prediction, ValidationError> {
        classifier::predict(vector, &self.snapshot().model)
    }

    /// Record the user's label for `email`. The ledger append has completed
    /// when this returns.
    pub fn record_feedback(&self, email: &EmailRecord, label: Label) -> Result<u64, LedgerError> {
        let text = email.classification_text();
        let vector = self.snapshot().vocabulary.transform(&text);
        self.record(NewExample {
            fingerprint: email.fingerprint(),
            label,
            vector,
            source_text: Some(text),
        })
    }

    /// Append a raw example to the ledger and mark the model stale.
    pub fn record(&self, example: NewExample) -> Result<u64, LedgerError> {
        let fingerprint = example.fingerprint.clone();
        let label = example.label;
        let seq = self.ledger.append(example)?;

        let mut phase = self.phase_guard();
        if *phase != TrainingPhase::Stale {
            debug!("phase {} -> {}", *phase, TrainingPhase::Stale);
        }
        *phase = TrainingPhase::Stale;
        info!("recorded {label} for {fingerprint} (#{seq})");
        Ok(seq)
    }

    /// Refit vocabulary and model from the whole ledger.
    ///
    /// On failure the active model is left untouched and the phase does not
    /// change. A failed save is only a warning: the new model is used for the
    /// rest of the session.
    pub fn retrain(&self) -> Result<RetrainOutcome, TrainingError> {
        let _serial = self.retrain_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match self.fit_from_ledger() {
            Ok(Fit {
                state,
                examples,
                excluded,
                unreadable,
            }) => {
                let persisted = match self.store.save(&state) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("classifier v{} kept in memory only: {e}", state.version);
                        false
                    }
                };
                let outcome_version = state.version;
                let vocab_version = state.vocabulary.version;
                let through = state.trained_through;
                *self.current.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(state);

                let mut phase = self.phase_guard();
                let newer = self.ledger.last_seq().map(|last| last > through).unwrap_or(false);
                let next = if newer {
                    TrainingPhase::Stale
                } else {
                    TrainingPhase::Ready
                };
                info!(
                    "retrained classifier v{outcome_version} on {examples} examples ({excluded} excluded, {unreadable} unreadable), phase {} -> {next}",
                    *phase
                );
                *phase = next;

                Ok(RetrainOutcome {
                    version: outcome_version,
                    vocab_version,
                    examples,
                    excluded,
                    unreadable,
                    persisted,
                    phase: next,
                })
            }
            Err(e) => {
                warn!("retrain skipped, keeping classifier v{}: {e}", self.snapshot().version);
                Err(e)
            }
        }
    }

    fn fit_from_ledger(&self) -> Result<Fit, TrainingError> {
        let current = self.snapshot();
        let through = self.ledger.last_seq()?;

        let mut groups: BTreeMap<Fingerprint, Group> = BTreeMap::new();
        let mut unreadable = 0usize;
        for row in self.ledger.all() {
            let ex = match row {
                Ok(ex) => ex,
                Err(e @ LedgerError::CorruptRow { .. }) => {
                    warn!("skipping ledger entry: {e}");
                    unreadable += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if ex.seq > through {
                break;
            }
            let group = groups.entry(ex.fingerprint).or_insert_with(|| Group {
                label: ex.label,
                counts: [0; 2],
                vector: ex.vector.clone(),
                text: None,
            });
            group.counts[slot(ex.label)] += 1;
            group.label = ex.label;
            group.vector = ex.vector;
            group.text = ex.source_text.or(group.text.take());
        }
        if groups.is_empty() {
            return Err(TrainingError::Empty);
        }
        require_both_labels(groups.values().map(|g| g.label))?;

        let refit = groups.values().all(|g| g.text.is_some());
        let vocabulary = if refit {
            Vocabulary::fit(
                groups.values().filter_map(|g| g.text.as_deref()),
                &self.options.fit,
                current.vocabulary.version + 1,
            )
        } else {
            debug!("some examples have no source text; keeping vocabulary v{}", current.vocabulary.version);
            current.vocabulary.clone()
        };

        let mut rows = Vec::with_capacity(groups.len());
        let mut excluded = 0usize;
        for group in groups.values() {
            let current_layout =
                group.vector.vocab_version == vocabulary.version && group.vector.dim() == vocabulary.len();
            let vector = match &group.text {
                Some(text) if refit || !current_layout => vocabulary.transform(text),
                _ if current_layout => group.vector.clone(),
                _ => {
                    excluded += 1;
                    continue;
                }
            };
            rows.push(LabeledVector {
                vector,
                label: group.label,
                weight: group.weight(),
            });
        }
        if excluded > 0 {
            warn!("{excluded} examples predate vocabulary v{} and were left out", vocabulary.version);
        }
        require_both_labels(rows.iter().map(|r| r.label))?;

        let model = classifier::train(&rows, &self.options.train)?;
        let examples = rows.len();
        let state = ClassifierState {
            version: current.version + 1,
            vocabulary,
            model,
            trained_through: through,
            origin: StateOrigin::Feedback { examples },
        };
        Ok(Fit {
            state,
            examples,
            excluded,
            unreadable,
        })
    }
}

fn require_both_labels(labels: impl Iterator<Item = Label>) -> Result<(), TrainingError> {
    let mut seen = [false; 2];
    let mut any = false;
    for label in labels {
        any = true;
        seen[slot(label)] = true;
    }
    match seen {
        _ if !any => Err(TrainingError::Empty),
        [true, true] => Ok(()),
        // Name the one label that is present.
        [false, _] => Err(TrainingError::SingleClass(Label::Important)),
        [_, false] => Err(TrainingError::SingleClass(Label::Junk)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::error::PersistenceError;
    use crate::store::{JsonStateStore, MemoryLedger};

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<ClassifierState>>,
        fail_saves: AtomicBool,
    }

    impl StateStore for Arc<MemoryStore> {
        fn load(&self) -> Result<Option<ClassifierState>, PersistenceError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, state: &ClassifierState) -> Result<(), PersistenceError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(PersistenceError::Io {
                    path: "memory".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }
    }

    fn email(id: u32, subject: &str, body: &str) -> EmailRecord {
        EmailRecord {
            id,
            message_id: Some(format!("<{id}@test>")),
            sender: "someone@example.com".into(),
            subject: subject.into(),
            body: body.into(),
            date_epoch: 0,
        }
    }

    fn start(ledger: Arc<MemoryLedger>, store: Arc<MemoryStore>) -> TrainingCoordinator {
        TrainingCoordinator::start(ledger, Box::new(store), TrainingOptions::default())
    }

    /// A state whose vocabulary is exactly ["alpha", "beta"].
    fn two_term_state(version: u64) -> ClassifierState {
        let mut state = bootstrap::bootstrap_state(&[], &TrainingOptions::default(), version);
        state.vocabulary = Vocabulary::fit(["alpha", "beta"], &FitOptions::default(), version);
        state.model = classifier::FittedModel {
            vocab_version: version,
            feature_len: 2,
            learning_rate: 0.3,
            init_raw: 0.0,
            stumps: vec![],
        };
        state
    }

    fn raw_example(fp: &str, values: [f32; 2], version: u64, label: Label) -> NewExample {
        NewExample {
            fingerprint: Fingerprint::new(fp).unwrap(),
            label,
            vector: FeatureVector::new(version, values.to_vec()),
            source_text: None,
        }
    }

    #[test]
    fn empty_ledger_bootstraps() {
        let coordinator = start(Arc::new(MemoryLedger::new()), Arc::default());
        assert_eq!(coordinator.phase(), TrainingPhase::Bootstrapped);

        let prediction = coordinator.classify(&email(1, "Flash sale", "unsubscribe now"));
        assert!((0.0..=1.0).contains(&prediction.confidence));

        assert!(matches!(coordinator.retrain(), Err(TrainingError::Empty)));
        assert_eq!(coordinator.phase(), TrainingPhase::Bootstrapped);
    }

    #[test]
    fn one_example_per_label_reaches_ready_and_refits_deterministically() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = start(Arc::new(MemoryLedger::new()), store.clone());
        let important = email(1, "Quarterly budget review", "Please send the figures before Thursday");
        let junk = email(2, "Mega discount weekend", "Unsubscribe from these promotions anytime");

        coordinator.record_feedback(&important, Label::Important).unwrap();
        assert_eq!(coordinator.phase(), TrainingPhase::Stale);
        coordinator.record_feedback(&junk, Label::Junk).unwrap();

        let outcome = coordinator.retrain().unwrap();
        assert_eq!(outcome.phase, TrainingPhase::Ready);
        assert_eq!(outcome.examples, 2);
        assert!(outcome.persisted);
        assert_eq!(coordinator.phase(), TrainingPhase::Ready);
        assert_eq!(coordinator.classify(&important).label, Label::Important);
        assert_eq!(coordinator.classify(&junk).label, Label::Junk);

        let before: Vec<f32> = [&important, &junk]
            .iter()
            .map(|e| coordinator.classify(e).p_important)
            .collect();
        coordinator.retrain().unwrap();
        let after: Vec<f32> = [&important, &junk]
            .iter()
            .map(|e| coordinator.classify(e).p_important)
            .collect();
        assert_eq!(before, after);
        assert_eq!(store.saved.lock().unwrap().as_ref().map(|s| s.version), Some(coordinator.snapshot().version));
    }

    #[test]
    fn separable_vectors_without_text_are_recovered() {
        let store = Arc::new(MemoryStore::default());
        *store.saved.lock().unwrap() = Some(two_term_state(7));
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = start(ledger.clone(), store);
        assert_eq!(coordinator.phase(), TrainingPhase::Ready);

        coordinator.record(raw_example("f1", [1.0, 0.0], 7, Label::Important)).unwrap();
        coordinator.record(raw_example("f2", [0.0, 1.0], 7, Label::Junk)).unwrap();
        let outcome = coordinator.retrain().unwrap();
        assert_eq!(outcome.vocab_version, 7);

        let vec1 = FeatureVector::new(7, vec![1.0, 0.0]);
        let vec2 = FeatureVector::new(7, vec![0.0, 1.0]);
        let p1 = coordinator.predict_vector(&vec1).unwrap();
        assert_eq!(p1.label, Label::Important);
        assert!(p1.confidence >= 0.5);
        assert_eq!(coordinator.predict_vector(&vec2).unwrap().label, Label::Junk);
    }

    #[test]
    fn stale_dimension_examples_are_excluded() {
        let store = Arc::new(MemoryStore::default());
        *store.saved.lock().unwrap() = Some(two_term_state(7));
        let coordinator = start(Arc::new(MemoryLedger::new()), store);

        coordinator.record(raw_example("old", [1.0, 0.0], 3, Label::Junk)).unwrap();
        coordinator.record(raw_example("f1", [1.0, 0.0], 7, Label::Important)).unwrap();
        coordinator.record(raw_example("f2", [0.0, 1.0], 7, Label::Junk)).unwrap();

        let outcome = coordinator.retrain().unwrap();
        assert_eq!(outcome.excluded, 1);
        assert_eq!(outcome.examples, 2);
    }

    #[test]
    fn single_label_ledger_keeps_last_known_good() {
        let coordinator = start(Arc::new(MemoryLedger::new()), Arc::default());
        let before = coordinator.snapshot();
        coordinator
            .record_feedback(&email(1, "Lunch", "See you at noon"), Label::Important)
            .unwrap();

        assert!(matches!(
            coordinator.retrain(),
            Err(TrainingError::SingleClass(Label::Important))
        ));
        assert_eq!(coordinator.phase(), TrainingPhase::Stale);
        assert!(Arc::ptr_eq(&before, &coordinator.snapshot()));
    }

    #[test]
    fn latest_label_supersedes_for_a_fingerprint() {
        let coordinator = start(Arc::new(MemoryLedger::new()), Arc::default());
        let flip = email(1, "Conference registration", "Your ticket is confirmed");
        let junk = email(2, "Weekly deals", "Unsubscribe to stop these emails");
        coordinator.record_feedback(&flip, Label::Junk).unwrap();
        coordinator.record_feedback(&junk, Label::Junk).unwrap();
        assert!(coordinator.retrain().is_err());

        coordinator.record_feedback(&flip, Label::Important).unwrap();
        let outcome = coordinator.retrain().unwrap();
        assert_eq!(outcome.examples, 2);
        assert_eq!(coordinator.classify(&flip).label, Label::Important);
    }

    #[test]
    fn save_failure_keeps_new_model_in_memory() {
        let store = Arc::new(MemoryStore::default());
        store.fail_saves.store(true, Ordering::SeqCst);
        let coordinator = start(Arc::new(MemoryLedger::new()), store.clone());
        coordinator
            .record_feedback(&email(1, "Board meeting agenda", "Slides attached"), Label::Important)
            .unwrap();
        coordinator
            .record_feedback(&email(2, "Win a cruise", "Click to claim your prize"), Label::Junk)
            .unwrap();

        let outcome = coordinator.retrain().unwrap();
        assert!(!outcome.persisted);
        assert_eq!(coordinator.phase(), TrainingPhase::Ready);
        assert_eq!(coordinator.snapshot().version, outcome.version);
        assert!(store.saved.lock().unwrap().is_none());
    }

    #[test]
    fn corrupt_state_file_starts_cold_and_bootstraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        std::fs::write(&path, "garbage").unwrap();

        let coordinator = TrainingCoordinator::start(
            Arc::new(MemoryLedger::new()),
            Box::new(JsonStateStore::new(&path)),
            TrainingOptions::default(),
        );
        assert_eq!(coordinator.phase(), TrainingPhase::Bootstrapped);
    }

    #[test]
    fn persisted_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        let ledger = Arc::new(MemoryLedger::new());
        let important = email(1, "Contract renewal", "Signature needed by Friday");
        {
            let coordinator = TrainingCoordinator::start(
                ledger.clone(),
                Box::new(JsonStateStore::new(&path)),
                TrainingOptions::default(),
            );
            coordinator.record_feedback(&important, Label::Important).unwrap();
            coordinator
                .record_feedback(&email(2, "Spring sale", "Unsubscribe here"), Label::Junk)
                .unwrap();
            coordinator.retrain().unwrap();
        }

        let restarted = TrainingCoordinator::start(
            ledger.clone(),
            Box::new(JsonStateStore::new(&path)),
            TrainingOptions::default(),
        );
        assert_eq!(restarted.phase(), TrainingPhase::Ready);
        assert_eq!(restarted.classify(&important).label, Label::Important);

        restarted
            .record_feedback(&email(3, "Flash offer", "Limited time"), Label::Junk)
            .unwrap();
        drop(restarted);
        let again = TrainingCoordinator::start(ledger, Box::new(JsonStateStore::new(&path)), TrainingOptions::default());
        assert_eq!(again.phase(), TrainingPhase::Stale);
    }

    #[test]
    fn empty_fingerprint_is_rejected_without_state_change() {
        let coordinator = start(Arc::new(MemoryLedger::new()), Arc::default());
        let example = NewExample {
            fingerprint: serde_json::from_str("\"\"").unwrap(),
            label: Label::Junk,
            vector: coordinator.snapshot().vocabulary.transform(""),
            source_text: None,
        };
        assert!(matches!(
            coordinator.record(example),
            Err(LedgerError::Invalid(ValidationError::EmptyFingerprint))
        ));
        assert_eq!(coordinator.phase(), TrainingPhase::Bootstrapped);
        assert_eq!(coordinator.ledger().len().unwrap(), 0);
    }
}
