use crate::agent::PtyAgent;
use crate::config::AgentConfig;
use crate::error::{Result, TandemError};
use crate::logger::Logger;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Stagger between agent startups so two TUIs don't fight for resources
const STARTUP_STAGGER: Duration = Duration::from_millis(500);

/// Holds every registered agent in registration order. Registration
/// happens before any agent starts; after `start_all` the registry is
/// read-only and safe to share across the session, the orchestration
/// loop, and the monitor thread.
pub struct AgentRegistry {
    agents: Vec<Arc<PtyAgent>>,
    logger: Logger,
}

impl AgentRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            agents: Vec::new(),
            logger,
        }
    }

    /// Register an agent. Names are unique; a duplicate registration is
    /// a warning and a no-op, leaving the first in place.
    pub fn register(&mut self, config: AgentConfig) -> bool {
        if self.agents.iter().any(|a| a.name() == config.name) {
            self.logger.warn(
                "registry",
                &format!("agent {} already registered", config.name),
            );
            return false;
        }
        self.logger.info(
            "registry",
            &format!("Registered agent: {} ({})", config.name, config.command),
        );
        self.agents
            .push(Arc::new(PtyAgent::new(config, self.logger.clone())));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PtyAgent>> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn agents(&self) -> &[Arc<PtyAgent>] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Registered and currently alive
    pub fn is_available(&self, name: &str) -> bool {
        self.get(name).is_some_and(|a| a.is_running())
    }

    /// The operator-facing agent: first registered agent that is running
    pub fn primary(&self) -> Option<&Arc<PtyAgent>> {
        self.agents.iter().find(|a| a.is_running())
    }

    /// The default delegation target: first running agent after the
    /// primary
    pub fn secondary(&self) -> Option<&Arc<PtyAgent>> {
        self.agents.iter().filter(|a| a.is_running()).nth(1)
    }

    /// Start every agent independently; partial success is fine as long
    /// as at least one came up.
    pub fn start_all(&self) -> Result<usize> {
        self.logger.info("registry", "Starting all agents...");

        let mut started = 0;
        let mut failed: Vec<String> = Vec::new();

        for agent in &self.agents {
            match agent.start() {
                Ok(()) => {
                    started += 1;
                    thread::sleep(STARTUP_STAGGER);
                }
                Err(e) => {
                    self.logger
                        .warn("registry", &format!("failed to start {}: {}", agent.name(), e));
                    failed.push(agent.name().to_string());
                }
            }
        }

        if started == 0 {
            return Err(TandemError::NoAgentsStarted);
        }

        if failed.is_empty() {
            self.logger.info("registry", "All agents started successfully");
        } else {
            self.logger.warn(
                "registry",
                &format!("some agents failed to start: {}", failed.join(", ")),
            );
            self.logger.info(
                "registry",
                &format!("{}/{} agents started", started, self.agents.len()),
            );
        }

        Ok(started)
    }

    /// Terminate every agent. Safe to call more than once.
    pub fn shutdown(&self) {
        self.logger.info("registry", "Shutting down all agents...");
        for agent in &self.agents {
            agent.terminate();
        }
        self.logger.info("registry", "All agents shut down");
    }

    /// Status table for the /status command
    pub fn status_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&"=".repeat(50));
        out.push_str("\nAgent Status:\n");
        out.push_str(&"=".repeat(50));
        out.push('\n');
        for agent in &self.agents {
            let status = if agent.is_running() {
                "🟢 Running"
            } else {
                "🔴 Stopped"
            };
            out.push_str(&format!("  {:<15} {}\n", agent.name(), status));
        }
        out.push_str(&"=".repeat(50));
        out
    }
}
