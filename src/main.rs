mod agent;
mod cli;
mod collector;
mod config;
mod error;
mod history;
mod logger;
mod marker;
mod orchestrate;
mod registry;
mod sanitize;
mod session;
mod signal;

use clap::Parser;
use cli::Cli;
use config::Config;
use error::{EXIT_SUCCESS, Result};
use history::ConversationHistory;
use logger::Logger;
use registry::AgentRegistry;
use session::InteractiveSession;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("tandem: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let logger = Logger::new(Path::new(&config.orchestrator.logging.file), cli.debug);

    if cli.debug {
        logger.debug("main", &format!("config: {:?}", config));
    }
    logger.info("main", "Starting tandem orchestrator");
    if let Some(path) = logger.path() {
        logger.info("main", &format!("Session log: {}", path.display()));
    }

    // Registration happens up front; the registry is read-only afterward
    let mut registry = AgentRegistry::new(logger.clone());
    for agent_config in config.enabled_agents() {
        registry.register(agent_config.clone());
    }
    let registry = Arc::new(registry);

    // Partial startup is fine; zero started agents is fatal
    registry.start_all()?;

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal::install_handlers(Arc::clone(&stop), Arc::clone(&registry)) {
        logger.warn("main", &format!("failed to install signal handlers: {}", e));
    }

    let history = (!cli.no_history && config.conversation.history.enabled)
        .then(|| ConversationHistory::new(config.conversation.history.max_entries));
    if history.is_none() {
        logger.debug("main", "conversation history disabled");
    }

    let mut session =
        InteractiveSession::new(&config, Arc::clone(&registry), history, logger, stop);
    let result = session.run();

    registry.shutdown();
    result
}
