use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Observe Ctrl-C instead of dying on it. The child shares our terminal and
/// receives the signal itself; cryptow stays alive to unmount afterwards.
pub fn install_signal_handler() {
    if let Err(e) = ctrlc::set_handler(move || {
        if !INTERRUPT_REQUESTED.swap(true, Ordering::SeqCst) {
            eprintln!("\ninterrupt received, unmounting once the command exits...");
        }
    }) {
        warn!("failed to install interrupt handler: {e}");
    }
}

pub fn interrupt_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::SeqCst)
}
