use crate::error::Result;
use crate::history::ConversationHistory;
use crate::logger::Logger;
use crate::marker::{Marker, MarkerParser};

/// Seam between the orchestration loop and the PTY layer: send text to
/// a named agent and hand back its cleaned reply.
pub trait TurnDispatch {
    fn dispatch(&mut self, agent: &str, text: &str) -> Result<String>;
    fn is_available(&self, agent: &str) -> bool;
}

/// How one top-level operator input ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// An agent emitted a completion marker
    Complete {
        final_result: String,
        iterations: u32,
    },
    /// Delegation named an agent that is unknown or not running; the
    /// last cleaned reply stands as the result
    AgentUnavailable {
        target: String,
        reply: String,
        iterations: u32,
    },
    /// The reply carried neither a delegation nor a completion marker
    NoMarker { reply: String, iterations: u32 },
    /// The collector came back empty after the full timeout
    EmptyReply { iterations: u32 },
    /// The outbound-send budget ran out before a completion marker
    BudgetExhausted { iterations: u32 },
}

/// Routes turns between agents according to the markers in their
/// replies. Strictly sequential: at most one agent is driven at a time,
/// and the send budget bounds the total outbound traffic per input.
pub struct Orchestrator {
    parser: MarkerParser,
    agent_names: Vec<String>,
    max_sends: u32,
    auto_preamble: bool,
    logger: Logger,
}

impl Orchestrator {
    pub fn new(
        agent_names: Vec<String>,
        max_sends: u32,
        auto_preamble: bool,
        logger: Logger,
    ) -> Self {
        Self {
            parser: MarkerParser::new(&agent_names),
            agent_names,
            max_sends: max_sends.max(1),
            auto_preamble,
            logger,
        }
    }

    /// Protocol instructions prepended to the first primary send when
    /// auto-orchestration is on
    fn preamble(&self) -> String {
        format!(
            "You are the primary agent in a multi-agent session. \
             Available agents: {}.\n\
             To delegate a subtask to another agent, output a line of the form:\n\
             \x20\x20@<agent>: <task>\n\
             When everything is finished, output [COMPLETE] followed by the final result.\n\
             ---\n",
            self.agent_names.join(", ")
        )
    }

    fn present(&self, agent: &str, reply: &str) {
        println!();
        println!("=== {} ===", agent);
        println!("{}", reply);
        self.logger
            .append_content(&format!("\n=== {} ===\n{}\n", agent, reply));
    }

    /// Drive one top-level input starting at the primary agent. Each
    /// iteration sends to the current agent, collects and parses the
    /// reply, and either finishes, routes a delegated subtask, or stops.
    pub fn run<D: TurnDispatch>(
        &self,
        dispatch: &mut D,
        mut history: Option<&mut ConversationHistory>,
        primary: &str,
        input: &str,
    ) -> Result<Outcome> {
        let mut current = primary.to_string();
        let mut text = if self.auto_preamble {
            format!("{}{}", self.preamble(), input)
        } else {
            input.to_string()
        };
        let mut sends = 0u32;
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            if sends >= self.max_sends {
                self.logger.warn(
                    "orchestrator",
                    &format!("loop budget ({}) exhausted", self.max_sends),
                );
                return Ok(Outcome::BudgetExhausted { iterations });
            }

            sends += 1;
            let reply = dispatch.dispatch(&current, &text)?;
            if reply.trim().is_empty() {
                self.logger.warn(
                    "orchestrator",
                    &format!("no response from {} within the timeout", current),
                );
                return Ok(Outcome::EmptyReply { iterations });
            }

            self.present(&current, &reply);
            if let Some(h) = history.as_deref_mut() {
                h.add_agent_message(&current, &reply);
            }

            match self.parser.parse(&reply) {
                Marker::Complete { final_result } => {
                    self.logger.debug(
                        "orchestrator",
                        &format!("completion after {} iteration(s)", iterations),
                    );
                    return Ok(Outcome::Complete {
                        final_result,
                        iterations,
                    });
                }
                Marker::Delegate { target, task } if target != current && !task.is_empty() => {
                    if !dispatch.is_available(&target) {
                        self.logger
                            .warn("orchestrator", &format!("agent {} not available", target));
                        return Ok(Outcome::AgentUnavailable {
                            target,
                            reply,
                            iterations,
                        });
                    }
                    if sends >= self.max_sends {
                        self.logger.warn(
                            "orchestrator",
                            &format!("loop budget ({}) exhausted", self.max_sends),
                        );
                        return Ok(Outcome::BudgetExhausted { iterations });
                    }

                    self.logger.info(
                        "orchestrator",
                        &format!("{} delegating to {}", current, target),
                    );
                    if let Some(h) = history.as_deref_mut() {
                        h.add_system_message(&format!(
                            "delegation: {} -> {}: {}",
                            current, target, task
                        ));
                    }

                    sends += 1;
                    let sub_reply = dispatch.dispatch(&target, &task)?;
                    self.present(&target, &sub_reply);
                    if let Some(h) = history.as_deref_mut() {
                        h.add_agent_message(&target, &sub_reply);
                    }

                    // Feed the sub-agent's answer back to the primary
                    text = format!(
                        "Response from {}:\n\n{}\n\nPlease continue.",
                        target, sub_reply
                    );
                    current = primary.to_string();
                }
                // Self-delegation and empty tasks count as unrouted
                Marker::Delegate { .. } | Marker::Absent => {
                    self.logger.warn(
                        "orchestrator",
                        &format!("{} produced no routing or completion marker", current),
                    );
                    return Ok(Outcome::NoMarker { reply, iterations });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// Scripted dispatcher: pops queued replies per agent and records
    /// every outbound send
    struct Scripted {
        replies: HashMap<String, VecDeque<String>>,
        available: HashSet<String>,
        sends: Vec<(String, String)>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                replies: HashMap::new(),
                available: HashSet::new(),
                sends: Vec::new(),
            }
        }

        fn agent(mut self, name: &str, replies: &[&str]) -> Self {
            self.replies.insert(
                name.to_string(),
                replies.iter().map(|r| r.to_string()).collect(),
            );
            self.available.insert(name.to_string());
            self
        }

        fn send_targets(&self) -> Vec<&str> {
            self.sends.iter().map(|(a, _)| a.as_str()).collect()
        }
    }

    impl TurnDispatch for Scripted {
        fn dispatch(&mut self, agent: &str, text: &str) -> Result<String> {
            self.sends.push((agent.to_string(), text.to_string()));
            Ok(self
                .replies
                .get_mut(agent)
                .and_then(|q| q.pop_front())
                .unwrap_or_default())
        }

        fn is_available(&self, agent: &str) -> bool {
            self.available.contains(agent)
        }
    }

    fn orchestrator(max_sends: u32, auto: bool) -> Orchestrator {
        Orchestrator::new(
            vec!["a1".to_string(), "a2".to_string()],
            max_sends,
            auto,
            Logger::console_only(false),
        )
    }

    #[test]
    fn test_direct_reply_completes() {
        let mut dispatch = Scripted::new().agent("a1", &["Hi there! [COMPLETE]"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                final_result: "Hi there!".to_string(),
                iterations: 1,
            }
        );
        assert_eq!(dispatch.send_targets(), vec!["a1"]);
        assert_eq!(dispatch.sends[0].1, "hello");
    }

    #[test]
    fn test_single_delegation_round_trip() {
        let mut dispatch = Scripted::new()
            .agent(
                "a1",
                &["I'll ask a2.\n@a2: compute fib(10)", "Answer: 55 [COMPLETE]"],
            )
            .agent("a2", &["55"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "compute fib(10)")
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                final_result: "Answer: 55".to_string(),
                iterations: 2,
            }
        );
        assert_eq!(dispatch.send_targets(), vec!["a1", "a2", "a1"]);
        // The delegated task goes out verbatim
        assert_eq!(dispatch.sends[1].1, "compute fib(10)");
        // The sub-reply is routed back to the primary
        assert_eq!(
            dispatch.sends[2].1,
            "Response from a2:\n\n55\n\nPlease continue."
        );
    }

    #[test]
    fn test_budget_bounds_outbound_sends() {
        let mut dispatch = Scripted::new()
            .agent("a1", &["@a2: ping", "@a2: ping"])
            .agent("a2", &["@a1: pong"]);
        let outcome = orchestrator(3, false)
            .run(&mut dispatch, None, "a1", "go")
            .unwrap();

        assert!(matches!(outcome, Outcome::BudgetExhausted { .. }));
        // Exactly three outbound sends: a1, a2, a1
        assert_eq!(dispatch.send_targets(), vec!["a1", "a2", "a1"]);
    }

    #[test]
    fn test_dead_secondary_stops_after_first_turn() {
        let mut dispatch = Scripted::new().agent("a1", &["@a2: x"]);
        // a2 never started
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "task")
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::AgentUnavailable {
                target: "a2".to_string(),
                reply: "@a2: x".to_string(),
                iterations: 1,
            }
        );
        assert_eq!(dispatch.send_targets(), vec!["a1"]);
    }

    #[test]
    fn test_reply_without_markers_stops() {
        let mut dispatch = Scripted::new().agent("a1", &["just some prose"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::NoMarker {
                reply: "just some prose".to_string(),
                iterations: 1,
            }
        );
    }

    #[test]
    fn test_self_delegation_is_ignored() {
        let mut dispatch = Scripted::new().agent("a1", &["@a1: talk to myself"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();
        assert!(matches!(outcome, Outcome::NoMarker { .. }));
        assert_eq!(dispatch.send_targets(), vec!["a1"]);
    }

    #[test]
    fn test_empty_task_delegation_is_ignored() {
        let mut dispatch = Scripted::new()
            .agent("a1", &["@a2:   "])
            .agent("a2", &["never reached"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();
        assert!(matches!(outcome, Outcome::NoMarker { .. }));
        assert_eq!(dispatch.send_targets(), vec!["a1"]);
    }

    #[test]
    fn test_empty_reply_aborts_turn() {
        let mut dispatch = Scripted::new().agent("a1", &[]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();
        assert_eq!(outcome, Outcome::EmptyReply { iterations: 1 });
    }

    #[test]
    fn test_completion_beats_delegation_in_one_reply() {
        let mut dispatch = Scripted::new()
            .agent("a1", &["@a2: keep going\n[COMPLETE] all done"])
            .agent("a2", &["never reached"]);
        let outcome = orchestrator(10, false)
            .run(&mut dispatch, None, "a1", "hello")
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                final_result: "all done".to_string(),
                iterations: 1,
            }
        );
        assert_eq!(dispatch.send_targets(), vec!["a1"]);
    }

    #[test]
    fn test_auto_preamble_prepended_once() {
        let mut dispatch = Scripted::new()
            .agent("a1", &["@a2: sub", "[COMPLETE]"])
            .agent("a2", &["result"]);
        orchestrator(10, true)
            .run(&mut dispatch, None, "a1", "the real input")
            .unwrap();

        let first = &dispatch.sends[0].1;
        assert!(first.contains("@<agent>: <task>"));
        assert!(first.contains("[COMPLETE]"));
        assert!(first.contains("a1, a2"));
        assert!(first.ends_with("the real input"));
        // The delegated task and the routed response are preamble-free
        assert_eq!(dispatch.sends[1].1, "sub");
        assert!(dispatch.sends[2].1.starts_with("Response from a2:"));
    }

    #[test]
    fn test_history_records_turns() {
        let mut history = ConversationHistory::new(100);
        let mut dispatch = Scripted::new()
            .agent("a1", &["@a2: sub", "[COMPLETE] done"])
            .agent("a2", &["sub result"]);
        orchestrator(10, false)
            .run(&mut dispatch, Some(&mut history), "a1", "input")
            .unwrap();

        let contents: Vec<_> = history.recent(10).iter().map(|m| m.content.clone()).collect();
        assert!(contents.iter().any(|c| c == "@a2: sub"));
        assert!(contents.iter().any(|c| c.contains("delegation: a1 -> a2")));
        assert!(contents.iter().any(|c| c == "sub result"));
        assert!(contents.iter().any(|c| c == "[COMPLETE] done"));
        assert_eq!(history.stats().agent_messages, 3);
        assert_eq!(history.stats().system_messages, 1);
    }
}
