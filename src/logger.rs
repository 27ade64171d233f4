use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared log sink: short prefixed lines on the console plus an
/// append-only session log file. Cloneable so the monitor thread and
/// per-agent supervisors can log through the same file handle.
#[derive(Clone)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
    debug: bool,
}

impl Logger {
    /// Open the session log file for appending. Failure to open is a
    /// warning, never fatal: the session continues console-only.
    pub fn new(log_path: &Path, debug: bool) -> Self {
        let file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => Some(Arc::new(Mutex::new(f))),
            Err(e) => {
                eprintln!(
                    "[tandem] Warning: could not open log file {}: {}",
                    log_path.display(),
                    e
                );
                None
            }
        };
        let path = file.is_some().then(|| log_path.to_path_buf());
        Self { file, path, debug }
    }

    /// Console-only logger for tests and early startup
    pub fn console_only(debug: bool) -> Self {
        Self {
            file: None,
            path: None,
            debug,
        }
    }

    /// Path of the session log file, if one is open
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn append(&self, component: &str, message: &str) {
        if let Some(ref file) = self.file {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "[{}] {}: {}", timestamp, component, message);
                let _ = f.flush();
            }
        }
    }

    /// Operator-facing message, mirrored to the log file
    pub fn info(&self, component: &str, message: &str) {
        println!("[tandem] {}", message);
        self.append(component, message);
    }

    /// Warning on stderr, mirrored to the log file
    pub fn warn(&self, component: &str, message: &str) {
        eprintln!("[tandem] Warning: {}", message);
        self.append(component, &format!("WARNING: {}", message));
    }

    /// Diagnostic detail; console output gated by --debug, always logged
    pub fn debug(&self, component: &str, message: &str) {
        if self.debug {
            eprintln!("[tandem:debug] {}: {}", component, message);
        }
        self.append(component, &format!("DEBUG: {}", message));
    }

    /// Raw content block (agent replies) written to the log file only
    pub fn append_content(&self, content: &str) {
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = write!(f, "{}", content);
                let _ = f.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_logger_writes_timestamped_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("session.log");

        let logger = Logger::new(&log_path, false);
        logger.info("orchestrator", "session started");
        logger.warn("agent.claude-1", "slow startup");
        logger.debug("collector", "idle check 2/3");

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("orchestrator: session started"));
        assert!(content.contains("agent.claude-1: WARNING: slow startup"));
        assert!(content.contains("collector: DEBUG: idle check 2/3"));
    }

    #[test]
    fn test_logger_clones_share_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("session.log");

        let logger = Logger::new(&log_path, false);
        let clone = logger.clone();
        logger.info("a", "first");
        clone.info("b", "second");

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("a: first"));
        assert!(content.contains("b: second"));
    }

    #[test]
    fn test_console_only_logger_has_no_path() {
        let logger = Logger::console_only(true);
        assert!(logger.path().is_none());
        // Must not panic without a file
        logger.info("x", "message");
        logger.append_content("raw\n");
    }

    #[test]
    fn test_append_content_is_verbatim() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("session.log");

        let logger = Logger::new(&log_path, false);
        logger.append_content("line one\nline two\n");

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("line one\nline two\n"));
    }
}
