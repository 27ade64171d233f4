use crate::agent::PtyAgent;
use crate::config::ResponseConfig;
use std::time::{Duration, Instant};

/// Settle delay after a send, before the first read: gives the agent a
/// moment to begin producing
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Backoff after a non-empty read, to batch rapid streams
const STREAM_BACKOFF: Duration = Duration::from_millis(500);

/// Pause between idle checks once the reply has started arriving
const WARM_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Anything the collector can poll a chunk of reply text out of
pub trait OutputSource {
    fn read_chunk(&mut self, timeout: Duration) -> String;
}

impl OutputSource for &PtyAgent {
    fn read_chunk(&mut self, timeout: Duration) -> String {
        self.read(timeout)
    }
}

/// Turn a streaming, end-markerless source into one discrete response.
///
/// The agents are LLM REPLs with no end-of-turn framing; consecutive
/// empty reads on a settled stream are the best available quiescence
/// proxy. Exits on the turn deadline or after `max_idle_checks` empty
/// reads in a row, whichever comes first.
pub fn collect_with<S: OutputSource>(
    source: &mut S,
    timing: &ResponseConfig,
    settle: Duration,
) -> String {
    std::thread::sleep(settle);

    let deadline = Instant::now() + timing.deadline();
    let mut collected = String::new();
    let mut idle_checks = 0u32;

    loop {
        let chunk = source.read_chunk(timing.read_timeout());
        if !chunk.is_empty() {
            collected.push_str(&chunk);
            idle_checks = 0;
            std::thread::sleep(STREAM_BACKOFF);
        } else {
            idle_checks += 1;
            // Cold start waits longer than a settled stream
            if collected.is_empty() {
                std::thread::sleep(timing.idle_wait());
            } else {
                std::thread::sleep(WARM_IDLE_WAIT);
            }
        }

        if Instant::now() >= deadline || idle_checks >= timing.max_idle_checks {
            break;
        }
    }

    collected
}

/// Collect one response from an agent using its configured timing
pub fn collect_response(agent: &PtyAgent) -> String {
    let timing = agent.response_config().clone();
    let mut source = agent;
    collect_with(&mut source, &timing, SETTLE_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted source: yields the queued chunks in order, then empties
    struct Scripted {
        chunks: Vec<String>,
        reads: u32,
    }

    impl Scripted {
        fn new(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().rev().map(|s| s.to_string()).collect(),
                reads: 0,
            }
        }
    }

    impl OutputSource for Scripted {
        fn read_chunk(&mut self, _timeout: Duration) -> String {
            self.reads += 1;
            self.chunks.pop().unwrap_or_default()
        }
    }

    fn fast_timing() -> ResponseConfig {
        ResponseConfig {
            timeout: 5,
            read_timeout: 0.01,
            max_idle_checks: 3,
            idle_wait: 0.01,
        }
    }

    #[test]
    fn test_collects_streamed_chunks() {
        let mut source = Scripted::new(&["first ", "second ", "third"]);
        let reply = collect_with(&mut source, &fast_timing(), Duration::ZERO);
        assert_eq!(reply, "first second third");
    }

    #[test]
    fn test_idle_counter_resets_on_data() {
        // Two empty reads interleaved never reach max_idle_checks
        let mut source = Scripted::new(&["a", "", "", "b", "", "", "c"]);
        let reply = collect_with(&mut source, &fast_timing(), Duration::ZERO);
        assert_eq!(reply, "abc");
    }

    #[test]
    fn test_quiescence_stops_after_max_idle_checks() {
        let mut source = Scripted::new(&["only"]);
        let timing = fast_timing();
        let reply = collect_with(&mut source, &timing, Duration::ZERO);
        assert_eq!(reply, "only");
        // 1 data read + exactly max_idle_checks empty reads
        assert_eq!(source.reads, 1 + timing.max_idle_checks);
    }

    #[test]
    fn test_empty_source_returns_empty() {
        let mut source = Scripted::new(&[]);
        let reply = collect_with(&mut source, &fast_timing(), Duration::ZERO);
        assert_eq!(reply, "");
        assert_eq!(source.reads, fast_timing().max_idle_checks);
    }

    #[test]
    fn test_deadline_bounds_collection() {
        /// Never goes quiet; the deadline has to end the turn
        struct Chatty;
        impl OutputSource for Chatty {
            fn read_chunk(&mut self, _timeout: Duration) -> String {
                std::thread::sleep(Duration::from_millis(5));
                "x".to_string()
            }
        }

        let timing = ResponseConfig {
            timeout: 1,
            read_timeout: 0.01,
            max_idle_checks: 3,
            idle_wait: 0.01,
        };
        let start = Instant::now();
        let reply = collect_with(&mut Chatty, &timing, Duration::ZERO);
        let elapsed = start.elapsed();

        assert!(!reply.is_empty());
        // Deadline is now + timeout; allow slack for the trailing backoff
        assert!(elapsed < timing.deadline() + Duration::from_secs(2));
    }
}
