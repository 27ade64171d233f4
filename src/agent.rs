use crate::config::{AgentConfig, ResponseConfig};
use crate::error::{Result, TandemError};
use crate::logger::Logger;
use crate::sanitize;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// PTY window size presented to every agent
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// Delay between banner drain attempts during startup
const DRAIN_PAUSE: Duration = Duration::from_millis(100);

/// Poll interval for the hybrid read path
const READ_POLL: Duration = Duration::from_millis(50);

/// Pause between `\n` and `\r` for agents that need both
const CR_DELAY: Duration = Duration::from_millis(50);

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Probe sent to prompt-activated agents after the banner drain
const ACTIVATION_PROBE: &str = "/status";

/// A startup banner with fewer printable characters than this is treated
/// as "nothing arrived yet" and triggers a newline nudge
const MIN_BANNER_CHARS: usize = 10;

/// Capability flags derived from the agent command. The specific CLIs
/// are not special-cased anywhere else: everything downstream keys off
/// these booleans.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuirkFlags {
    /// The prompt only accepts input after an initial nudge and probe
    pub prompt_activated: bool,
    /// TUI input wants a `\r` shortly after the `\n`
    pub cr_after_lf: bool,
}

impl QuirkFlags {
    pub fn for_command(command: &str) -> Self {
        let stem = Path::new(command)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(command);
        match stem {
            "codex" => Self {
                prompt_activated: true,
                cr_after_lf: false,
            },
            "claude" | "gemini" => Self {
                prompt_activated: false,
                cr_after_lf: true,
            },
            _ => Self::default(),
        }
    }
}

/// What the reaper saw when a stopped agent was collected
#[derive(Debug, Clone, PartialEq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

/// Master-side handles; both live from start() until terminate()
struct PtyIo {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

/// Supervises one child process attached to a PTY master.
///
/// All methods take `&self`: the supervisor is shared between the
/// session driver, the orchestration loop, and the background monitor,
/// so the mutable pieces live behind atomics and mutexes. The reader
/// thread is the only consumer of the master fd; everything it reads
/// lands in the mutex-guarded byte buffer, which `read` drains.
pub struct PtyAgent {
    config: AgentConfig,
    quirks: QuirkFlags,
    logger: Logger,
    io: Mutex<PtyIo>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    /// 0 means no child
    pid: Arc<AtomicI32>,
    process_running: Arc<AtomicBool>,
    /// Monotonic: once the slave side is gone this never clears
    pty_closed: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat_stop: Arc<AtomicBool>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    exit_info: Mutex<Option<ExitInfo>>,
    last_sent: Mutex<Option<String>>,
}

impl PtyAgent {
    pub fn new(config: AgentConfig, logger: Logger) -> Self {
        let quirks = QuirkFlags::for_command(&config.command);
        Self {
            config,
            quirks,
            logger,
            io: Mutex::new(PtyIo {
                master: None,
                writer: None,
            }),
            child: Mutex::new(None),
            pid: Arc::new(AtomicI32::new(0)),
            process_running: Arc::new(AtomicBool::new(false)),
            pty_closed: Arc::new(AtomicBool::new(false)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            reader: Mutex::new(None),
            heartbeat_stop: Arc::new(AtomicBool::new(false)),
            heartbeat: Mutex::new(None),
            exit_info: Mutex::new(None),
            last_sent: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    pub fn response_config(&self) -> &ResponseConfig {
        &self.config.response
    }

    pub fn last_sent(&self) -> Option<String> {
        lock(&self.last_sent).clone()
    }

    /// Exit details recorded when the child was reaped, consumed once
    pub fn take_exit_info(&self) -> Option<ExitInfo> {
        lock(&self.exit_info).take()
    }

    fn component(&self) -> String {
        format!("agent.{}", self.config.name)
    }

    /// Fork the agent under a PTY, absorb its startup banner, and apply
    /// the activation quirks. Failure leaves the supervisor stopped and
    /// is not fatal to the orchestrator.
    pub fn start(&self) -> Result<()> {
        which::which(&self.config.command).map_err(|_| TandemError::CommandNotFound {
            agent: self.config.name.clone(),
            command: self.config.command.clone(),
        })?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TandemError::io("creating PTY pair", io::Error::other(e.to_string())))?;

        let mut cmd = CommandBuilder::new(&self.config.command);
        for arg in &self.config.args {
            cmd.arg(arg);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            TandemError::io(
                format!("spawning {} in PTY", self.config.command),
                io::Error::other(e.to_string()),
            )
        })?;
        // The slave stays open in the child only; the parent drops it so
        // the master sees EOF when the child goes away
        drop(pair.slave);

        if let Some(pid) = child.process_id() {
            self.pid.store(pid as i32, Ordering::SeqCst);
        }

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TandemError::io("cloning PTY reader", io::Error::other(e.to_string())))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TandemError::io("taking PTY writer", io::Error::other(e.to_string())))?;

        {
            let mut io_state = lock(&self.io);
            io_state.master = Some(pair.master);
            io_state.writer = Some(Arc::new(Mutex::new(writer)));
        }
        *lock(&self.child) = Some(child);
        *lock(&self.reader) = Some(self.spawn_reader(reader));

        // Let the agent draw its banner, then absorb it
        thread::sleep(Duration::from_secs_f64(self.config.startup.wait_after_start));
        let mut banner = self.drain_for(self.config.startup.initial_read_attempts);

        // A child that died during the drain failed to start; report its
        // exit code with the banner as diagnostic context
        if let Some(status) = self.poll_child_exit() {
            let output: String = sanitize::strip_escapes(&banner).chars().take(500).collect();
            self.abort_start();
            return Err(TandemError::StartupExit {
                agent: self.config.name.clone(),
                code: Some(status),
                output,
            });
        }

        let clean = sanitize::strip_escapes(&banner);
        if sanitize::printable_chars(&clean) < MIN_BANNER_CHARS || self.quirks.prompt_activated {
            self.logger
                .debug(&self.component(), "quiet startup, nudging prompt");
            self.write_bytes(b"\n")?;
            banner.extend(self.drain_for(self.config.startup.initial_read_attempts / 3 + 1));
            if self.quirks.prompt_activated {
                self.write_bytes(format!("{}\n", ACTIVATION_PROBE).as_bytes())?;
                banner.extend(self.drain_for(self.config.startup.initial_read_attempts / 3 + 1));
            }
        }

        self.process_running.store(true, Ordering::SeqCst);
        self.logger.info(
            &self.component(),
            &format!(
                "Started {} (PID {})",
                self.config.name,
                self.pid.load(Ordering::SeqCst)
            ),
        );

        let excerpt: String = sanitize::strip_escapes(&banner).chars().take(200).collect();
        if !excerpt.trim().is_empty() {
            self.logger
                .debug(&self.component(), &format!("initial output: {}", excerpt));
        }

        if self.config.heartbeat.enabled {
            self.spawn_heartbeat();
        }

        Ok(())
    }

    /// Reader thread: the single drain path for the master fd. Appends
    /// everything to the shared buffer; on EOF or error it checks child
    /// liveness and latches pty_closed only when the child is gone.
    fn spawn_reader(&self, mut reader: Box<dyn Read + Send>) -> JoinHandle<()> {
        let buffer = Arc::clone(&self.buffer);
        let pty_closed = Arc::clone(&self.pty_closed);
        let process_running = Arc::clone(&self.process_running);
        let pid = Arc::clone(&self.pid);
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => {
                        let p = pid.load(Ordering::SeqCst);
                        if p <= 0 || kill(Pid::from_raw(p), None).is_err() {
                            process_running.store(false, Ordering::SeqCst);
                            pty_closed.store(true, Ordering::SeqCst);
                        }
                        break;
                    }
                    Ok(n) => {
                        lock(&buffer).extend_from_slice(&chunk[..n]);
                    }
                }
            }
        })
    }

    /// Atomically swap out whatever the reader thread has buffered
    fn take_buffered(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.buffer))
    }

    /// Drain the buffer `attempts` times with a short pause in between
    fn drain_for(&self, attempts: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..attempts.max(1) {
            out.extend(self.take_buffered());
            thread::sleep(DRAIN_PAUSE);
        }
        out.extend(self.take_buffered());
        out
    }

    /// Non-blocking check for an already-exited child during startup
    fn poll_child_exit(&self) -> Option<i32> {
        let mut child = lock(&self.child);
        match child.as_mut()?.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    fn writer(&self) -> Option<Arc<Mutex<Box<dyn Write + Send>>>> {
        lock(&self.io).writer.clone()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer()
            .ok_or_else(|| TandemError::SendFailed(self.config.name.clone()))?;
        let mut w = lock_arc(&writer);
        w.write_all(bytes)
            .and_then(|_| w.flush())
            .map_err(|e| TandemError::io(format!("writing to {} PTY", self.config.name), e))
    }

    /// Write `text` plus a newline to the agent's PTY. Refused when the
    /// agent is not running.
    pub fn send(&self, text: &str) -> Result<()> {
        if !self.is_running() {
            self.logger
                .warn(&self.component(), "cannot send: agent not running");
            return Err(TandemError::SendFailed(self.config.name.clone()));
        }

        self.write_bytes(text.as_bytes())?;
        self.write_bytes(b"\n")?;
        if self.quirks.cr_after_lf {
            thread::sleep(CR_DELAY);
            self.write_bytes(b"\r")?;
        }

        let preview: String = text.chars().take(60).collect();
        self.logger
            .debug(&self.component(), &format!("-> {}", preview));
        *lock(&self.last_sent) = Some(text.to_string());
        Ok(())
    }

    /// Hybrid read: swap out buffered bytes, then keep polling until the
    /// deadline while the agent is alive. Returns escape-stripped text.
    pub fn read(&self, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected = self.take_buffered();

        while !self.pty_closed.load(Ordering::SeqCst)
            && self.is_running()
            && Instant::now() < deadline
        {
            thread::sleep(READ_POLL);
            collected.extend(self.take_buffered());
        }
        collected.extend(self.take_buffered());

        sanitize::strip_escapes(&collected)
    }

    /// Signal-0 liveness probe. kill(pid, 0) also succeeds for zombies,
    /// so a non-blocking reap distinguishes "running" from "exited but
    /// not collected"; exit details are stashed for the monitor.
    pub fn is_running(&self) -> bool {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid <= 0 {
            return false;
        }
        if kill(Pid::from_raw(pid), None).is_err() {
            self.process_running.store(false, Ordering::SeqCst);
            return false;
        }
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(WaitStatus::Exited(_, code)) => {
                *lock(&self.exit_info) = Some(ExitInfo {
                    code: Some(code),
                    signal: None,
                });
                self.process_running.store(false, Ordering::SeqCst);
                false
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                *lock(&self.exit_info) = Some(ExitInfo {
                    code: None,
                    signal: Some(sig.to_string()),
                });
                self.process_running.store(false, Ordering::SeqCst);
                false
            }
            Ok(_) => true,
            Err(_) => {
                // Already reaped elsewhere
                self.process_running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Whether the slave side has been observed gone
    pub fn pty_closed(&self) -> bool {
        self.pty_closed.load(Ordering::SeqCst)
    }

    /// Periodic newline nudge for agents that idle themselves out. The
    /// reader thread drains whatever the nudge provokes into the shared
    /// buffer, so nothing is lost between turns.
    fn spawn_heartbeat(&self) {
        let Some(writer) = self.writer() else { return };
        let stop = Arc::clone(&self.heartbeat_stop);
        let running = Arc::clone(&self.process_running);
        let interval = Duration::from_secs(self.config.heartbeat.interval.max(1));
        let logger = self.logger.clone();
        let component = self.component();

        let handle = thread::spawn(move || {
            let step = Duration::from_millis(250);
            'beat: loop {
                let mut waited = Duration::ZERO;
                while waited < interval {
                    if stop.load(Ordering::SeqCst) || !running.load(Ordering::SeqCst) {
                        break 'beat;
                    }
                    thread::sleep(step);
                    waited += step;
                }
                let mut w = lock_arc(&writer);
                if w.write_all(b"\n").and_then(|_| w.flush()).is_err() {
                    logger.debug(&component, "heartbeat write failed, stopping");
                    break;
                }
            }
        });
        *lock(&self.heartbeat) = Some(handle);
    }

    /// Stop the heartbeat, SIGTERM the child, escalate to SIGKILL after
    /// the grace period, then close the master fd. Idempotent.
    pub fn terminate(&self) {
        self.heartbeat_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.heartbeat).take() {
            let _ = handle.join();
        }

        let pid = self.pid.load(Ordering::SeqCst);
        if pid > 0 && self.is_running() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            let deadline = Instant::now() + TERM_GRACE;
            while self.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(100));
            }
            if self.is_running() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
            // Collect the corpse so the monitor never sees a zombie
            for _ in 0..20 {
                match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => thread::sleep(Duration::from_millis(50)),
                    _ => break,
                }
            }
        }
        self.process_running.store(false, Ordering::SeqCst);

        // Close the master fd exactly once; the reader thread exits on
        // the EOF this produces
        {
            let mut io_state = lock(&self.io);
            io_state.writer = None;
            io_state.master = None;
        }
        if let Some(handle) = lock(&self.reader).take() {
            let deadline = Instant::now() + Duration::from_millis(500);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
            // Otherwise detach; a blocked read dies with the process
        }

        self.logger
            .info(&self.component(), &format!("Terminated {}", self.config.name));
    }

    /// Roll back a partially-started agent after a startup failure
    fn abort_start(&self) {
        self.process_running.store(false, Ordering::SeqCst);
        let mut io_state = lock(&self.io);
        io_state.writer = None;
        io_state.master = None;
    }
}

impl Drop for PtyAgent {
    fn drop(&mut self) {
        self.heartbeat_stop.store(true, Ordering::SeqCst);
        let pid = self.pid.load(Ordering::SeqCst);
        if pid > 0 && self.process_running.load(Ordering::SeqCst) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            let _ = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Mutex lock that shrugs off poisoning: every critical section here is
/// a short append/swap that cannot panic halfway
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_arc<T>(mutex: &Arc<Mutex<T>>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
