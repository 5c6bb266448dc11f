use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::training::coordinator::TrainingCoordinator;

#[derive(Default)]
struct Slot {
    pending: bool,
    running: bool,
    shutdown: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Background thread running retrains off the interactive path.
///
/// Requests made while a retrain is pending or running collapse into one
/// follow-up retrain.
pub struct RetrainWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RetrainWorker {
    pub fn spawn(coordinator: Arc<TrainingCoordinator>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("retrain".into())
            .spawn(move || run(&thread_shared, &coordinator))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Ask for a retrain. Returns immediately.
    pub fn request(&self) {
        let mut slot = self.shared.lock();
        if slot.shutdown {
            return;
        }
        if slot.pending {
            debug!("retrain already queued");
        }
        slot.pending = true;
        self.shared.wake.notify_one();
    }

    /// Block until nothing is queued or running.
    pub fn wait_idle(&self) {
        let mut slot = self.shared.lock();
        while slot.pending || slot.running {
            slot = self.shared.idle.wait(slot).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Finish any queued or running retrain, then stop the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut slot = self.shared.lock();
            slot.shutdown = true;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("retrain worker panicked");
            }
        }
    }
}

impl Drop for RetrainWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, coordinator: &TrainingCoordinator) {
    loop {
        {
            let mut slot = shared.lock();
            while !slot.pending && !slot.shutdown {
                slot = shared.wake.wait(slot).unwrap_or_else(|p| p.into_inner());
            }
            if !slot.pending {
                // Shutdown with nothing left to do.
                shared.idle.notify_all();
                return;
            }
            slot.pending = false;
            slot.running = true;
        }

        // Failures are logged by the coordinator and leave the last good model.
        let _ = coordinator.retrain();

        let mut slot = shared.lock();
        slot.running = false;
        if !slot.pending {
            shared.idle.notify_all();
        }
    }
}
