//! Log relay: owns the monitored subprocess and forwards its output to the
//! `logs` topic.
//!
//! stdout and stderr are drained by two independent tasks feeding one line
//! channel; a supervisor task waits for exit and appends the exit notice to the
//! same channel once both drains have finished.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};
use crate::event::StreamEvent;
use crate::types::{LogLine, LogSource};

const LINE_BUFFER: usize = 1024;
// How long the exit notice waits for trailing output.
const DRAIN_GRACE: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Program and arguments of the monitored app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl AppCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Splits a command line on whitespace. No shell quoting is applied.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for AppCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

struct RunningApp {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl RunningApp {
    // Waits for the supervisor so the exit notice precedes anything the
    // next generation emits.
    async fn terminate(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if timeout(STOP_GRACE, &mut self.supervisor).await.is_err() {
            warn!(pid = ?self.pid, "app did not exit in time");
            self.supervisor.abort();
        }
    }
}

pub struct LogRelay {
    command: Option<AppCommand>,
    lines: mpsc::Sender<LogLine>,
    current: Mutex<Option<RunningApp>>,
    forwarder: JoinHandle<()>,
}

impl LogRelay {
    /// Creates the relay and its forwarding task. Must be called inside a
    /// tokio runtime. Does not start the app.
    pub fn spawn(bus: Arc<EventBus>, command: Option<AppCommand>) -> Arc<Self> {
        let (lines, mut rx) = mpsc::channel::<LogLine>(LINE_BUFFER);
        let forwarder = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                bus.publish(Topic::Logs, StreamEvent::log(&line));
            }
        });
        Arc::new(Self {
            command,
            lines,
            current: Mutex::new(None),
            forwarder,
        })
    }

    pub fn command(&self) -> Option<&AppCommand> {
        self.command.as_ref()
    }

    async fn emit(&self, line: LogLine) {
        let _ = self.lines.send(line).await;
    }

    /// Stops the tracked app (if any) and launches a fresh one. Returns the new
    /// pid, or `None` when nothing was started; failures are reported on the
    /// `logs` topic rather than returned.
    pub async fn restart(&self) -> Option<u32> {
        let Some(command) = self.command.as_ref() else {
            self.emit(LogLine::system("no app command configured")).await;
            return None;
        };
        let mut current = self.current.lock().await;
        if let Some(prev) = current.take() {
            prev.terminate().await;
        }

        let mut child = match command.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command, "failed to start app: {e}");
                self.emit(LogLine::system(format!("failed to start {command}: {e}")))
                    .await;
                return None;
            }
        };
        let pid = child.id();
        info!(command = %command, pid = ?pid, "app started");
        let started = match pid {
            Some(pid) => format!("started {command} (pid {pid})"),
            None => format!("started {command}"),
        };
        self.emit(LogLine::system(started)).await;

        let drains = [
            tokio::spawn(drain(child.stdout.take(), LogSource::Stdout, self.lines.clone())),
            tokio::spawn(drain(child.stderr.take(), LogSource::Stderr, self.lines.clone())),
        ];
        let (kill, kill_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let supervisor = tokio::spawn(supervise(
            child,
            kill_rx,
            drains,
            self.lines.clone(),
            Arc::clone(&alive),
        ));
        *current = Some(RunningApp {
            pid,
            kill: Some(kill),
            supervisor,
            alive,
        });
        pid
    }

    /// Terminates the tracked app. Safe to call when nothing is running.
    pub async fn stop(&self) {
        let prev = self.current.lock().await.take();
        if let Some(prev) = prev {
            prev.terminate().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|app| app.alive.load(Ordering::Acquire))
    }
}

impl Drop for LogRelay {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn drain<R>(reader: Option<R>, source: LogSource, lines: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = LogLine::new(source, String::from_utf8_lossy(&bytes));
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(?source, "output stream read failed: {e}");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    drains: [JoinHandle<()>; 2],
    lines: mpsc::Sender<LogLine>,
    alive: Arc<AtomicBool>,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    for d in drains {
        let _ = timeout(DRAIN_GRACE, d).await;
    }
    alive.store(false, Ordering::Release);

    let notice = match status {
        Ok(status) => {
            info!(pid = ?pid, %status, "app exited");
            exit_message(status)
        }
        Err(e) => format!("process wait failed: {e}"),
    };
    let _ = lines.send(LogLine::system(notice)).await;
}

fn exit_message(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("process exited, code={code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("process exited, signal={signal}");
        }
    }
    String::from("process exited, code=unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_whitespace() {
        let cmd = AppCommand::parse("  python3   app.py --verbose ").unwrap();
        assert_eq!(cmd.program(), "python3");
        assert_eq!(cmd.to_string(), "python3 app.py --verbose");
        assert!(AppCommand::parse("   ").is_none());
    }
}
