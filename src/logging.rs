use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};

fn builder() -> Builder {
    Builder::from_env(Env::default().default_filter_or("info"))
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_stderr() {
    // A second init (tests, repeated calls) is harmless.
    let _ = builder().try_init();
}

/// Append log lines to `path` instead of the terminal, so a full-screen UI
/// is never drawn over.
pub fn init_file(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let _ = builder().target(Target::Pipe(Box::new(file))).try_init();
    Ok(())
}
