use clap::Parser;
use std::path::PathBuf;

/// Terminal orchestrator that pairs interactive AI CLI agents
///
/// Examples:
///   tandem                        Run with ./config.yaml or defaults
///   tandem --config team.yaml     Run with a specific configuration
///   tandem --debug --no-history   Verbose diagnostics, no history
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose diagnostics
    #[arg(short, long)]
    pub debug: bool,

    /// Disable the conversation history
    #[arg(long)]
    pub no_history: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["tandem"]);
        assert!(cli.config.is_none());
        assert!(!cli.debug);
        assert!(!cli.no_history);
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::parse_from(["tandem", "--config", "team.yaml", "--debug", "--no-history"]);
        assert_eq!(cli.config, Some(PathBuf::from("team.yaml")));
        assert!(cli.debug);
        assert!(cli.no_history);
    }
}
