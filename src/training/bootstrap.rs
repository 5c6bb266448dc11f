//! Synthetic training data for a cold start.
//!
//! Sender and keyword heuristics are written down as a handful of example
//! emails rather than as branching rules, so the very first model is an
//! ordinary fit like every later one. Bump [`TABLE_VERSION`] whenever the
//! table changes.

use log::warn;

use crate::classifier::{FittedModel, LabeledVector, Vocabulary, train};
use crate::domain::Label;
use crate::training::coordinator::TrainingOptions;
use crate::training::state::{ClassifierState, StateOrigin};

pub const TABLE_VERSION: u32 = 1;

pub struct SyntheticExample {
    pub label: Label,
    pub sender: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

impl SyntheticExample {
    /// Same layout as `EmailRecord::classification_text`.
    pub fn text(&self) -> String {
        format!("{} {} {}", self.subject, self.sender, self.body)
    }
}

pub const SYNTHETIC_EXAMPLES: &[SyntheticExample] = &[
    SyntheticExample {
        label: Label::Important,
        sender: "manager@company.com",
        subject: "Project deadline moved to Friday",
        body: "Please review the attached plan and confirm before the meeting tomorrow.",
    },
    SyntheticExample {
        label: Label::Important,
        sender: "billing@utility.com",
        subject: "Invoice due: payment required",
        body: "Your invoice is attached. Payment is due by the end of the month.",
    },
    SyntheticExample {
        label: Label::Important,
        sender: "security@accounts.google.com",
        subject: "Security alert: new sign-in to your account",
        body: "We noticed a new sign-in. If this was not you, reset your password now.",
    },
    SyntheticExample {
        label: Label::Important,
        sender: "recruiting@company.com",
        subject: "Interview schedule confirmation",
        body: "Your interview is scheduled for Monday at 10am. Reply to confirm the time.",
    },
    SyntheticExample {
        label: Label::Important,
        sender: "colleague@company.com",
        subject: "Urgent: action required on the contract",
        body: "Can you sign the contract today? The client is waiting on our reply.",
    },
    SyntheticExample {
        label: Label::Junk,
        sender: "deals@shop-offers.com",
        subject: "Flash sale: 70% off everything",
        body: "Limited time offer! Shop now and use promo code SAVE70. Unsubscribe here.",
    },
    SyntheticExample {
        label: Label::Junk,
        sender: "newsletter@media-digest.com",
        subject: "Your weekly newsletter digest",
        body: "Top stories this week. Click to read more. Manage preferences or unsubscribe.",
    },
    SyntheticExample {
        label: Label::Junk,
        sender: "winner@prize-center.net",
        subject: "Congratulations, you have won a prize",
        body: "Claim your free gift card now. Click here immediately, no obligation.",
    },
    SyntheticExample {
        label: Label::Junk,
        sender: "noreply@marketing-mail.com",
        subject: "Exclusive deal just for you",
        body: "Buy now and get free shipping. This discount ends tonight. Unsubscribe anytime.",
    },
    SyntheticExample {
        label: Label::Junk,
        sender: "promo@social-app.com",
        subject: "You have 12 new notifications",
        body: "See what your friends are up to. Download the app for exclusive rewards.",
    },
];

/// Fit a state on the synthetic table plus any extra labeled texts.
///
/// Never fails: the table contains both labels, and should a fit still be
/// impossible the result is a neutral model that scores everything 0.5.
pub fn bootstrap_state(
    extra: &[(&str, Label)],
    options: &TrainingOptions,
    version: u64,
) -> ClassifierState {
    let mut corpus: Vec<(String, Label)> = SYNTHETIC_EXAMPLES
        .iter()
        .map(|ex| (ex.text(), ex.label))
        .collect();
    corpus.extend(extra.iter().map(|(text, label)| (text.to_string(), *label)));

    let vocabulary = Vocabulary::fit(corpus.iter().map(|(t, _)| t.as_str()), &options.fit, version);
    let rows: Vec<LabeledVector> = corpus
        .iter()
        .map(|(text, label)| LabeledVector::new(vocabulary.transform(text), *label))
        .collect();

    let model = train(&rows, &options.train).unwrap_or_else(|e| {
        warn!("bootstrap fit failed ({e}); using a neutral model");
        FittedModel {
            vocab_version: vocabulary.version,
            feature_len: vocabulary.len(),
            learning_rate: options.train.learning_rate,
            init_raw: 0.0,
            stumps: Vec::new(),
        }
    });

    ClassifierState {
        version,
        vocabulary,
        model,
        trained_through: 0,
        origin: StateOrigin::Bootstrap {
            table_version: TABLE_VERSION,
        },
    }
}
