use crate::error::{Result, TandemError};
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One conversation entry. Timestamps are unix seconds so stored
/// sessions stay portable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: f64,
    pub role: Role,
    pub agent_name: Option<String>,
    pub content: String,
}

impl Message {
    pub fn format_timestamp(&self) -> String {
        let secs = self.timestamp as i64;
        match Local.timestamp_opt(secs, 0) {
            chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            _ => format!("{}", self.timestamp),
        }
    }
}

/// Per-role message counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_messages: u64,
    pub user_messages: u64,
    pub agent_messages: u64,
    pub system_messages: u64,
}

/// On-disk shape of a saved session
#[derive(Serialize, Deserialize)]
struct SessionData {
    session_id: String,
    session_start_time: f64,
    stats: HistoryStats,
    messages: Vec<Message>,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Bounded in-memory conversation record with JSON persistence and
/// Markdown export
pub struct ConversationHistory {
    messages: VecDeque<Message>,
    max_entries: usize,
    pub session_id: String,
    session_start_time: f64,
    stats: HistoryStats,
}

impl ConversationHistory {
    pub fn new(max_entries: usize) -> Self {
        let now = unix_now();
        Self {
            messages: VecDeque::with_capacity(max_entries.min(64)),
            max_entries: max_entries.max(1),
            session_id: format!("session_{}_{}", now as u64, std::process::id()),
            session_start_time: now,
            stats: HistoryStats::default(),
        }
    }

    fn add(&mut self, role: Role, agent_name: Option<String>, content: &str) {
        if self.messages.len() == self.max_entries {
            self.messages.pop_front();
        }
        self.messages.push_back(Message {
            timestamp: unix_now(),
            role,
            agent_name,
            content: content.to_string(),
        });

        self.stats.total_messages += 1;
        match role {
            Role::User => self.stats.user_messages += 1,
            Role::Agent => self.stats.agent_messages += 1,
            Role::System => self.stats.system_messages += 1,
        }
    }

    pub fn add_user_message(&mut self, content: &str) {
        self.add(Role::User, None, content);
    }

    pub fn add_agent_message(&mut self, agent_name: &str, content: &str) {
        self.add(Role::Agent, Some(agent_name.to_string()), content);
    }

    pub fn add_system_message(&mut self, content: &str) {
        self.add(Role::System, None, content);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The newest `count` messages, oldest first
    pub fn recent(&self, count: usize) -> Vec<&Message> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).collect()
    }

    /// Case-insensitive substring search over message content
    pub fn search(&self, keyword: &str) -> Vec<&Message> {
        let needle = keyword.to_lowercase();
        self.messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn stats(&self) -> &HistoryStats {
        &self.stats
    }

    /// Save the session as JSON, creating parent directories as needed
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    TandemError::io(format!("creating {}", parent.display()), e)
                })?;
            }
        }

        let data = SessionData {
            session_id: self.session_id.clone(),
            session_start_time: self.session_start_time,
            stats: self.stats.clone(),
            messages: self.messages.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| TandemError::io("serializing history", std::io::Error::other(e)))?;
        fs::write(path, json)
            .map_err(|e| TandemError::io(format!("writing {}", path.display()), e))
    }

    /// Load a previously saved session, replacing the current contents
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .map_err(|e| TandemError::io(format!("reading {}", path.display()), e))?;
        let data: SessionData = serde_json::from_str(&content)
            .map_err(|e| TandemError::io("parsing history", std::io::Error::other(e)))?;

        self.session_id = data.session_id;
        self.session_start_time = data.session_start_time;
        self.stats = data.stats;
        self.messages = data.messages.into_iter().collect();
        while self.messages.len() > self.max_entries {
            self.messages.pop_front();
        }
        Ok(())
    }

    /// Export the conversation as a Markdown document
    pub fn export_markdown(&self, path: &Path, title: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    TandemError::io(format!("creating {}", parent.display()), e)
                })?;
            }
        }

        let started: DateTime<Local> = match Local.timestamp_opt(self.session_start_time as i64, 0)
        {
            chrono::LocalResult::Single(dt) => dt,
            _ => Local::now(),
        };

        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", title));
        out.push_str(&format!("**Session**: {}\n\n", self.session_id));
        out.push_str(&format!(
            "**Started**: {}\n\n",
            started.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("**Messages**: {}\n\n---\n\n", self.messages.len()));

        for msg in &self.messages {
            let heading = match msg.role {
                Role::User => "👤 Operator".to_string(),
                Role::Agent => format!("🤖 {}", msg.agent_name.as_deref().unwrap_or("agent")),
                Role::System => "ℹ️ System".to_string(),
            };
            out.push_str(&format!("## {} ({})\n\n", heading, msg.format_timestamp()));
            out.push_str(&format!("{}\n\n---\n\n", msg.content));
        }

        out.push_str("## Stats\n\n");
        out.push_str(&format!("- total: {}\n", self.stats.total_messages));
        out.push_str(&format!("- user: {}\n", self.stats.user_messages));
        out.push_str(&format!("- agent: {}\n", self.stats.agent_messages));
        out.push_str(&format!("- system: {}\n", self.stats.system_messages));

        fs::write(path, out)
            .map_err(|e| TandemError::io(format!("writing {}", path.display()), e))
    }
}

/// Summary row for listing stored sessions
#[derive(Debug)]
pub struct SessionInfo {
    pub filename: String,
    pub session_id: String,
    pub message_count: usize,
    pub modified: SystemTime,
}

/// Stores and retrieves saved sessions under one directory
pub struct SessionManager {
    session_dir: PathBuf,
}

impl SessionManager {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    /// Save a session under `name`, or its session id when unnamed.
    /// Returns the path written.
    pub fn save(&self, history: &ConversationHistory, name: Option<&str>) -> Result<PathBuf> {
        let filename = match name {
            Some(n) => format!("{}.json", n),
            None => format!("{}.json", history.session_id),
        };
        let path = self.session_dir.join(filename);
        history.save_to_file(&path)?;
        Ok(path)
    }

    /// Load by exact name, falling back to the first file whose name
    /// contains it
    pub fn load(&self, name: &str, max_entries: usize) -> Result<ConversationHistory> {
        let exact = self.session_dir.join(format!("{}.json", name));
        let path = if exact.exists() {
            exact
        } else {
            self.find_matching(name).ok_or_else(|| {
                TandemError::io(
                    format!("session '{}'", name),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such session"),
                )
            })?
        };

        let mut history = ConversationHistory::new(max_entries);
        history.load_from_file(&path)?;
        Ok(history)
    }

    fn find_matching(&self, name: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.session_dir).ok()?;
        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().to_string();
            if filename.ends_with(".json") && filename.contains(name) {
                return Some(entry.path());
            }
        }
        None
    }

    /// All stored sessions, newest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        let Ok(entries) = fs::read_dir(&self.session_dir) else {
            return sessions;
        };

        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().to_string();
            if !filename.ends_with(".json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let Ok(data) = serde_json::from_str::<SessionData>(&content) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            sessions.push(SessionInfo {
                filename,
                session_id: data.session_id,
                message_count: data.messages.len(),
                modified,
            });
        }

        sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
        sessions
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.session_dir.join(format!("{}.json", name));
        fs::remove_file(&path)
            .map_err(|e| TandemError::io(format!("deleting {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_stats() {
        let mut history = ConversationHistory::new(100);
        history.add_user_message("hello");
        history.add_agent_message("claude-1", "hi there");
        history.add_agent_message("codex", "me too");
        history.add_system_message("delegation: claude-1 -> codex");

        assert_eq!(history.len(), 4);
        let stats = history.stats();
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.agent_messages, 2);
        assert_eq!(stats.system_messages, 1);
    }

    #[test]
    fn test_ring_buffer_caps_entries() {
        let mut history = ConversationHistory::new(3);
        for i in 0..10 {
            history.add_user_message(&format!("msg {}", i));
        }
        assert_eq!(history.len(), 3);
        let recent: Vec<_> = history.recent(3).iter().map(|m| m.content.clone()).collect();
        assert_eq!(recent, vec!["msg 7", "msg 8", "msg 9"]);
        // Stats keep counting past the cap
        assert_eq!(history.stats().total_messages, 10);
    }

    #[test]
    fn test_recent_returns_oldest_first() {
        let mut history = ConversationHistory::new(10);
        history.add_user_message("one");
        history.add_user_message("two");
        history.add_user_message("three");
        let recent: Vec<_> = history.recent(2).iter().map(|m| m.content.clone()).collect();
        assert_eq!(recent, vec!["two", "three"]);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut history = ConversationHistory::new(10);
        history.add_user_message("Compute Fibonacci");
        history.add_agent_message("claude-1", "fibonacci of 10 is 55");
        history.add_user_message("unrelated");

        let hits = history.search("FIBONACCI");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/dir/history.json");

        let mut history = ConversationHistory::new(10);
        history.add_user_message("hello");
        history.add_agent_message("claude-1", "hi");
        history.save_to_file(&path).unwrap();

        let mut loaded = ConversationHistory::new(10);
        loaded.load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.session_id, history.session_id);
        assert_eq!(loaded.recent(1)[0].content, "hi");
        assert_eq!(loaded.recent(1)[0].agent_name.as_deref(), Some("claude-1"));
    }

    #[test]
    fn test_export_markdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("export.md");

        let mut history = ConversationHistory::new(10);
        history.add_user_message("the question");
        history.add_agent_message("codex", "the answer");
        history.export_markdown(&path, "Conversation").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Conversation"));
        assert!(content.contains("the question"));
        assert!(content.contains("🤖 codex"));
        assert!(content.contains("- total: 2"));
    }

    #[test]
    fn test_session_manager_save_list_load_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(temp_dir.path());

        let mut history = ConversationHistory::new(10);
        history.add_user_message("persisted");
        manager.save(&history, Some("alpha")).unwrap();

        let sessions = manager.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].filename, "alpha.json");
        assert_eq!(sessions[0].message_count, 1);

        let loaded = manager.load("alpha", 10).unwrap();
        assert_eq!(loaded.recent(1)[0].content, "persisted");

        // Substring fallback
        let loaded = manager.load("alph", 10).unwrap();
        assert_eq!(loaded.len(), 1);

        manager.delete("alpha").unwrap();
        assert!(manager.list().is_empty());
        assert!(manager.load("alpha", 10).is_err());
    }
}
