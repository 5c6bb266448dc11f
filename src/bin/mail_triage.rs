use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::warn;

use mail_triage::auth::{TokenManager, token_store};
use mail_triage::config::{AuthMethod, Config, load_config, resolve_data_dir};
use mail_triage::daemon::notifier::DesktopNotifier;
use mail_triage::daemon::{DaemonConfig, run_watch};
use mail_triage::domain::Label;
use mail_triage::error::LedgerError;
use mail_triage::logging;
use mail_triage::mail::{ImapClient, ImapLogin, Mailbox};
use mail_triage::reconcile::{LabelNames, LabelReconciler};
use mail_triage::session::{Session, SessionOptions};
use mail_triage::store::{FeedbackLedger, JsonStateStore, MemoryLedger, SqliteLedger};
use mail_triage::summarize::{self, Summarizer};
use mail_triage::terminal::run_tui;
use mail_triage::training::{TrainingCoordinator, TrainingOptions};

#[derive(Parser)]
#[command(name = "mail_triage")]
#[command(about = "Sort mail into important and junk, learning from your labels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session: fetch, classify, read, label
    Tui,

    /// Poll the mailbox and notify on new important mail
    Watch {
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },

    /// Refit the classifier on the feedback ledger now
    Retrain,

    /// Show classifier and ledger status
    Stats,

    /// Store the OAuth client secret in keyring
    SetClientSecret {
        #[arg(long)]
        client_id: String,
    },

    /// Store an IMAP app password for the configured user in keyring
    SetAppPassword,
}

fn read_secret(prompt: &str) -> Result<String> {
    eprintln!("{prompt} (end with Ctrl-D):");
    let mut secret = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut secret)?;
    let secret = secret.trim().to_string();
    if secret.is_empty() {
        return Err(anyhow!("nothing entered"));
    }
    Ok(secret)
}

fn open_ledger(data_dir: &Path) -> Arc<dyn FeedbackLedger> {
    let path = data_dir.join("feedback.db");
    match SqliteLedger::open(&path) {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            warn!(
                "could not open feedback ledger at {} ({e}); labels from this run will not be kept",
                path.display()
            );
            Arc::new(MemoryLedger::new())
        }
    }
}

fn start_coordinator(cfg: &Config, data_dir: &Path) -> Arc<TrainingCoordinator> {
    let mut options = TrainingOptions::default();
    options.fit.max_features = cfg.max_features;
    let store = JsonStateStore::new(data_dir.join("classifier.json"));
    Arc::new(TrainingCoordinator::start(
        open_ledger(data_dir),
        Box::new(store),
        options,
    ))
}

fn connect_mailbox(cfg: &Config, data_dir: &Path) -> Result<ImapClient> {
    let user = cfg.user_email()?.to_string();
    let login = match cfg.auth {
        AuthMethod::Oauth2 => ImapLogin::XOAuth2(TokenManager::from_config(cfg, data_dir)?),
        AuthMethod::Password => {
            let password = token_store::load_app_password(&user)?
                .ok_or_else(|| anyhow!("no app password stored for {user}; run set-app-password"))?;
            ImapLogin::Password(password)
        }
    };
    Ok(ImapClient::new(
        cfg.imap_server.clone(),
        cfg.imap_port,
        user,
        login,
        cfg.label_mode,
    ))
}

fn reconciler(cfg: &Config, mailbox: Arc<dyn Mailbox>) -> LabelReconciler {
    let names = LabelNames {
        important: cfg.important_label.clone(),
        junk: cfg.junk_label.clone(),
    };
    LabelReconciler::new(mailbox, names, cfg.mark_read)
}

fn tui(cfg: &Config, data_dir: &Path) -> Result<()> {
    logging::init_file(&data_dir.join("mail_triage.log"))?;

    let coordinator = start_coordinator(cfg, data_dir);
    let mailbox: Arc<dyn Mailbox> = Arc::new(connect_mailbox(cfg, data_dir)?);
    let reconciler = Arc::new(reconciler(cfg, mailbox.clone()));
    let summarizer: Arc<dyn Summarizer> = Arc::from(summarize::from_config(cfg.summarizer.as_ref()));

    let mut session = Session::new(
        coordinator,
        mailbox,
        reconciler,
        summarizer,
        SessionOptions {
            fetch_count: cfg.fetch_count,
            retrain: cfg.retrain,
        },
    )?;
    let result = run_tui(&mut session).map_err(|e| anyhow!("{e:?}"));
    eprintln!("saving what you taught me...");
    session.finish();
    result
}

fn watch(cfg: &Config, data_dir: &Path, interval: u64) -> Result<()> {
    let coordinator = start_coordinator(cfg, data_dir);
    let mailbox: Arc<dyn Mailbox> = Arc::new(connect_mailbox(cfg, data_dir)?);
    let reconciler = reconciler(cfg, mailbox.clone());
    run_watch(
        coordinator,
        mailbox.as_ref(),
        &reconciler,
        &DesktopNotifier,
        DaemonConfig::new(interval, cfg.fetch_count, &cfg.watch),
    )
}

fn retrain(cfg: &Config, data_dir: &Path) -> Result<()> {
    let coordinator = start_coordinator(cfg, data_dir);
    let outcome = coordinator.retrain().context("retrain failed")?;
    println!(
        "classifier v{} (vocabulary v{}) fitted on {} emails",
        outcome.version, outcome.vocab_version, outcome.examples
    );
    if outcome.excluded > 0 {
        println!(
            "{} older labels skipped: their features predate the current vocabulary",
            outcome.excluded
        );
    }
    if outcome.unreadable > 0 {
        println!("{} unreadable ledger entries ignored", outcome.unreadable);
    }
    if !outcome.persisted {
        println!("warning: the new model could not be saved and will be lost on exit");
    }
    Ok(())
}

fn stats(cfg: &Config, data_dir: &Path) -> Result<()> {
    let coordinator = start_coordinator(cfg, data_dir);
    let state = coordinator.snapshot();
    let ledger = coordinator.ledger();

    let mut counts = [0usize; 2];
    let mut with_text = 0usize;
    let mut unreadable = 0usize;
    for row in ledger.all() {
        let ex = match row {
            Ok(ex) => ex,
            Err(LedgerError::CorruptRow { .. }) => {
                unreadable += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        counts[usize::from(ex.label == Label::Important)] += 1;
        with_text += usize::from(ex.source_text.is_some());
    }

    println!("phase:       {}", coordinator.phase());
    println!("classifier:  v{} ({:?})", state.version, state.origin);
    println!(
        "vocabulary:  v{}, {} terms",
        state.vocabulary.version,
        state.vocabulary.len()
    );
    println!("trained through ledger entry {}", state.trained_through);
    println!(
        "ledger:      {} entries ({} important, {} junk, {} with text)",
        ledger.len()?,
        counts[1],
        counts[0],
        with_text
    );
    if unreadable > 0 {
        println!("             {unreadable} entries could not be read and are ignored");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::SetClientSecret { client_id } => {
            logging::init_stderr();
            let secret = read_secret("Paste client secret")?;
            token_store::save_client_secret(&client_id, &secret)?;
            println!("Saved client secret for client_id {}", client_id);
            Ok(())
        }

        Command::SetAppPassword => {
            logging::init_stderr();
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let user = cfg.user_email()?;
            let password = read_secret(&format!("Paste app password for {user}"))?;
            token_store::save_app_password(user, &password)?;
            println!("Saved app password for {user}");
            Ok(())
        }

        Command::Tui => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let data_dir = resolve_data_dir(&cfg)?;
            tui(&cfg, &data_dir)
        }

        Command::Watch { interval } => {
            logging::init_stderr();
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let data_dir = resolve_data_dir(&cfg)?;
            watch(&cfg, &data_dir, interval)
        }

        Command::Retrain => {
            logging::init_stderr();
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let data_dir = resolve_data_dir(&cfg)?;
            retrain(&cfg, &data_dir)
        }

        Command::Stats => {
            logging::init_stderr();
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let data_dir = resolve_data_dir(&cfg)?;
            stats(&cfg, &data_dir)
        }
    }
}
