use crate::registry::AgentRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Signal state constants
const SIGNAL_NONE: u8 = 0;
const SIGNAL_FIRST: u8 = 1; // graceful shutdown requested

/// Global signal state
static SIGNAL_RECEIVED: AtomicU8 = AtomicU8::new(SIGNAL_NONE);

/// Handle interrupt (runs on the ctrlc handler thread, not in signal
/// context, so terminating agents here is safe)
fn handle_interrupt(stop_flag: &Arc<AtomicBool>, registry: &Arc<AgentRegistry>) {
    let current = SIGNAL_RECEIVED.load(Ordering::SeqCst);

    if current == SIGNAL_NONE {
        // First signal: ask the session to wind down at its next
        // dispatch boundary
        SIGNAL_RECEIVED.store(SIGNAL_FIRST, Ordering::SeqCst);
        stop_flag.store(true, Ordering::SeqCst);
        eprintln!(
            "\n[tandem] Interrupt received, finishing up... (press Ctrl+C again to force quit)"
        );
    } else {
        // Second signal: kill the agents and leave
        eprintln!("\n[tandem] Force quit!");
        registry.shutdown();
        std::process::exit(1);
    }
}

/// Install SIGINT/SIGTERM handlers.
///
/// The first signal only sets the shared stop flag; terminate() runs
/// from the main task when the session loop observes it. A second
/// signal shuts the agents down immediately and exits.
pub fn install_handlers(
    stop_flag: Arc<AtomicBool>,
    registry: Arc<AgentRegistry>,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        handle_interrupt(&stop_flag, &registry);
    })
}
