use crate::collector;
use crate::config::Config;
use crate::error::{Result, TandemError};
use crate::history::{ConversationHistory, SessionManager};
use crate::logger::Logger;
use crate::orchestrate::{Orchestrator, Outcome, TurnDispatch};
use crate::registry::AgentRegistry;
use crate::sanitize::LineFilter;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const HELP_TEXT: &str = r#"
INTERACTIVE MODE:
  <text>               orchestrate, starting at the primary agent
  > <task>             force-route the task to the secondary agent

COMMANDS:
  /help                show this help
  /status              show agent status
  /history [n]         show the last n messages (default 10)
  /search <keyword>    search the conversation history
  /save [name]         save the session
  /export [path]       export the conversation as Markdown
  /sessions            list saved sessions
  /clear               clear the screen
  /exit                quit
"#;

/// Send-and-collect over the real agent registry: write the text to the
/// agent's PTY, wait for quiescence, then apply the line filter with the
/// sent text as the echo to suppress.
pub struct RegistryDispatch {
    registry: Arc<AgentRegistry>,
    filter: LineFilter,
}

impl RegistryDispatch {
    pub fn new(registry: Arc<AgentRegistry>, filter: LineFilter) -> Self {
        Self { registry, filter }
    }
}

impl TurnDispatch for RegistryDispatch {
    fn dispatch(&mut self, agent: &str, text: &str) -> Result<String> {
        let target = self
            .registry
            .get(agent)
            .ok_or_else(|| TandemError::AgentUnavailable(agent.to_string()))?;
        target.send(text)?;
        let raw = collector::collect_response(target);
        let lines = self.filter.clean(&raw, target.last_sent().as_deref(), None);
        Ok(lines.join("\n"))
    }

    fn is_available(&self, agent: &str) -> bool {
        self.registry.is_available(agent)
    }
}

/// Background sweep: every monitoring interval, probe each agent and
/// warn the operator about running-to-stopped transitions, with the exit
/// code or signal from the reap. Never terminates the session.
fn spawn_monitor(
    registry: Arc<AgentRegistry>,
    logger: Logger,
    interval: Duration,
    active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let mut was_running: Vec<(String, bool)> = registry
        .agents()
        .iter()
        .map(|a| (a.name().to_string(), a.is_running()))
        .collect();

    thread::spawn(move || {
        let step = Duration::from_millis(250);
        'sweep: loop {
            let mut waited = Duration::ZERO;
            while waited < interval {
                if !active.load(Ordering::SeqCst) {
                    break 'sweep;
                }
                thread::sleep(step);
                waited += step;
            }

            for agent in registry.agents() {
                let running_now = agent.is_running();
                if let Some(entry) = was_running.iter_mut().find(|(n, _)| n == agent.name()) {
                    if entry.1 && !running_now {
                        let detail = match agent.take_exit_info() {
                            Some(info) => match (info.code, info.signal) {
                                (Some(code), _) => format!("exit code {}", code),
                                (None, Some(sig)) => format!("killed by {}", sig),
                                (None, None) => "unknown cause".to_string(),
                            },
                            None => "unknown cause".to_string(),
                        };
                        logger.warn(
                            "monitor",
                            &format!("{} has stopped running ({})", agent.name(), detail),
                        );
                    }
                    entry.1 = running_now;
                }
            }
        }
    })
}

/// First word and remainder of a `/command` line
fn parse_command(line: &str) -> (String, &str) {
    let trimmed = line.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (trimmed.to_lowercase(), ""),
    }
}

/// Line-oriented operator console. Reads operator input and routes it:
/// `/` commands to the shell, `>` lines straight to the secondary agent,
/// everything else through the orchestration loop.
pub struct InteractiveSession {
    registry: Arc<AgentRegistry>,
    orchestrator: Orchestrator,
    dispatch: RegistryDispatch,
    history: Option<ConversationHistory>,
    sessions: SessionManager,
    logger: Logger,
    stop: Arc<AtomicBool>,
    monitoring_enabled: bool,
    monitor_interval: Duration,
    monitor_active: Arc<AtomicBool>,
    history_file: Option<PathBuf>,
}

impl InteractiveSession {
    pub fn new(
        config: &Config,
        registry: Arc<AgentRegistry>,
        history: Option<ConversationHistory>,
        logger: Logger,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            registry.names(),
            config.orchestrator.max_loops,
            config.orchestrator.auto_preamble,
            logger.clone(),
        );
        let dispatch = RegistryDispatch::new(
            Arc::clone(&registry),
            LineFilter::new(&config.output.filtering.noise_keywords),
        );
        let history_file = (history.is_some() && config.conversation.history.save_to_file)
            .then(|| PathBuf::from(&config.conversation.history.file_path));

        Self {
            registry,
            orchestrator,
            dispatch,
            history,
            sessions: SessionManager::new(&config.conversation.history.session_dir),
            logger,
            stop,
            monitoring_enabled: config.orchestrator.monitoring.enabled,
            monitor_interval: Duration::from_secs(config.orchestrator.monitoring.interval.max(1)),
            monitor_active: Arc::new(AtomicBool::new(true)),
            history_file,
        }
    }

    fn banner(&self) {
        let available: Vec<String> = self
            .registry
            .agents()
            .iter()
            .filter(|a| a.is_running())
            .map(|a| a.name().to_string())
            .collect();
        println!();
        println!("{}", "=".repeat(60));
        println!("tandem - terminal orchestrator for AI CLI agents");
        println!("   Available: {}", available.join(", "));
        println!("{}", "=".repeat(60));
        println!("Type '/help' for commands");
        println!("{}", "=".repeat(60));
        println!();
    }

    /// Run the operator loop until EOF, /exit, or an interrupt
    pub fn run(&mut self) -> Result<()> {
        self.banner();

        let monitor = self.monitoring_enabled.then(|| {
            spawn_monitor(
                Arc::clone(&self.registry),
                self.logger.clone(),
                self.monitor_interval,
                Arc::clone(&self.monitor_active),
            )
        });

        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let label = self
                .registry
                .primary()
                .map(|a| a.name().to_string())
                .unwrap_or_else(|| "tandem".to_string());
            print!("{}> ", label);
            let _ = io::stdout().flush();

            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(e) => {
                    self.logger
                        .debug("session", &format!("stdin read failed: {}", e));
                    break;
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let input = line.trim().to_string();
            if input.is_empty() {
                continue;
            }

            if input.starts_with('/') {
                if !self.handle_command(&input) {
                    break;
                }
            } else if let Some(task) = input.strip_prefix('>') {
                self.force_route(task.trim());
            } else {
                self.run_orchestration(&input);
            }
        }

        self.monitor_active.store(false, Ordering::SeqCst);
        if let Some(handle) = monitor {
            let _ = handle.join();
        }

        if let (Some(history), Some(path)) = (self.history.as_ref(), self.history_file.as_ref()) {
            if let Err(e) = history.save_to_file(path) {
                self.logger
                    .warn("session", &format!("could not save history: {}", e));
            } else {
                self.logger.info(
                    "session",
                    &format!(
                        "History saved to {} ({} messages)",
                        path.display(),
                        history.len()
                    ),
                );
            }
        }

        println!("\nSession ended");
        Ok(())
    }

    /// Hand one operator input to the orchestration loop
    fn run_orchestration(&mut self, input: &str) {
        let Some(primary) = self.registry.primary() else {
            self.logger
                .warn("session", "no agent available to handle this input");
            return;
        };
        let primary_name = primary.name().to_string();

        if let Some(h) = self.history.as_mut() {
            h.add_user_message(input);
        }

        match self.orchestrator.run(
            &mut self.dispatch,
            self.history.as_mut(),
            &primary_name,
            input,
        ) {
            Ok(Outcome::Complete {
                final_result,
                iterations,
            }) => {
                self.logger.info(
                    "session",
                    &format!("Task complete after {} iteration(s)", iterations),
                );
                if !final_result.is_empty() {
                    println!("\n[tandem] Final result:\n{}", final_result);
                }
            }
            // The loop already warned and presented whatever it had
            Ok(_) => {}
            Err(e) => {
                self.logger
                    .warn("session", &format!("turn aborted: {}", e));
            }
        }
    }

    /// `> task` sends straight to the secondary agent, no orchestration
    fn force_route(&mut self, task: &str) {
        if task.is_empty() {
            self.logger.warn("session", "nothing to route");
            return;
        }
        let Some(secondary) = self.registry.secondary() else {
            self.logger.warn("session", "no secondary agent available");
            return;
        };
        let name = secondary.name().to_string();

        println!("\n→ {}: {}", name, task);
        if let Some(h) = self.history.as_mut() {
            h.add_user_message(task);
        }

        match self.dispatch.dispatch(&name, task) {
            Ok(reply) if reply.trim().is_empty() => {
                println!("(no output from {})", name);
            }
            Ok(reply) => {
                println!();
                println!("=== {} ===", name);
                println!("{}", reply);
                if let Some(h) = self.history.as_mut() {
                    h.add_agent_message(&name, &reply);
                }
            }
            Err(e) => {
                self.logger
                    .warn("session", &format!("routing to {} failed: {}", name, e));
            }
        }
    }

    /// Handle a `/command`; returns false when the session should end
    fn handle_command(&mut self, line: &str) -> bool {
        let (cmd, arg) = parse_command(line);
        match cmd.as_str() {
            "/help" => println!("{}", HELP_TEXT),
            "/status" | "/agents" => println!("{}", self.registry.status_report()),
            "/history" => self.show_history(arg),
            "/search" => self.search_history(arg),
            "/save" => self.save_session(arg),
            "/export" => self.export_history(arg),
            "/sessions" => self.list_sessions(),
            "/clear" => print!("\x1b[2J\x1b[1;1H"),
            "/exit" | "/quit" => {
                println!("Exiting...");
                return false;
            }
            other => println!("Unknown command: {}", other),
        }
        true
    }

    fn show_history(&self, arg: &str) {
        let Some(history) = self.history.as_ref() else {
            println!("History is disabled");
            return;
        };
        let count = arg.parse::<usize>().unwrap_or(10);
        if history.is_empty() {
            println!("(history is empty)");
            return;
        }
        for msg in history.recent(count) {
            let who = msg
                .agent_name
                .as_deref()
                .unwrap_or(match msg.role {
                    crate::history::Role::User => "operator",
                    crate::history::Role::System => "system",
                    crate::history::Role::Agent => "agent",
                });
            let preview: String = msg.content.chars().take(80).collect();
            println!("[{}] {}: {}", msg.format_timestamp(), who, preview);
        }
    }

    fn search_history(&self, keyword: &str) {
        let Some(history) = self.history.as_ref() else {
            println!("History is disabled");
            return;
        };
        if keyword.is_empty() {
            println!("Usage: /search <keyword>");
            return;
        }
        let hits = history.search(keyword);
        if hits.is_empty() {
            println!("No matches for '{}'", keyword);
            return;
        }
        for msg in hits {
            let preview: String = msg.content.chars().take(80).collect();
            println!("[{}] {}", msg.format_timestamp(), preview);
        }
    }

    fn save_session(&mut self, arg: &str) {
        let Some(history) = self.history.as_ref() else {
            println!("History is disabled");
            return;
        };
        let name = (!arg.is_empty()).then_some(arg);
        match self.sessions.save(history, name) {
            Ok(path) => println!("Session saved to {}", path.display()),
            Err(e) => self
                .logger
                .warn("session", &format!("could not save session: {}", e)),
        }
    }

    fn export_history(&self, arg: &str) {
        let Some(history) = self.history.as_ref() else {
            println!("History is disabled");
            return;
        };
        let path = if arg.is_empty() {
            PathBuf::from("conversation.md")
        } else {
            PathBuf::from(arg)
        };
        match history.export_markdown(&path, "Conversation") {
            Ok(()) => println!("Exported to {}", path.display()),
            Err(e) => self
                .logger
                .warn("session", &format!("export failed: {}", e)),
        }
    }

    fn list_sessions(&self) {
        let sessions = self.sessions.list();
        if sessions.is_empty() {
            println!("(no saved sessions)");
            return;
        }
        for info in sessions {
            println!(
                "  {:<30} {} messages ({})",
                info.filename, info.message_count, info.session_id
            );
        }
    }
}
