//! Framed GTP request/response over a child process's stdio.
//!
//! One command is in flight per engine at a time; responses are read by a
//! dedicated thread and handed over a channel so every receive can carry a
//! deadline and observe the process-wide cancellation token.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{trace, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GtpError {
    #[error("no response within {0:.3}s")]
    Timeout(f64),
    #[error("engine channel closed")]
    ChannelClosed,
    #[error("malformed GTP response frame: {0:?}")]
    MalformedFrame(String),
    #[error("engine error reply: {0}")]
    EngineError(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where an engine's stderr lines go. The drain thread holds a clone and
/// never touches the request/response channel, so a chatty engine cannot
/// perturb protocol timing.
pub struct StderrSink {
    name: String,
    mirror: bool,
    file: Mutex<Option<File>>,
}

impl StderrSink {
    pub fn new(name: &str, mirror: bool) -> Arc<StderrSink> {
        Arc::new(StderrSink {
            name: name.to_string(),
            mirror,
            file: Mutex::new(None),
        })
    }

    /// Redirect captured stderr to `path` (append) until the next call.
    /// `None` stops file capture.
    pub fn set_file(&self, path: Option<&Path>) {
        let file = match path {
            Some(p) => match File::options().create(true).append(true).open(p) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("{}: cannot open stderr log {}: {e}", self.name, p.display());
                    None
                }
            },
            None => None,
        };
        *self.file.lock().unwrap() = file;
    }

    fn write(&self, line: &str) {
        if let Some(f) = self.file.lock().unwrap().as_mut() {
            let _ = writeln!(f, "{line}");
        }
        if self.mirror {
            eprintln!("[{}] {line}", self.name);
        }
    }
}

/// A running child speaking GTP on its stdio.
pub struct Transport {
    name: String,
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    cancel: Receiver<()>,
}

impl Transport {
    pub fn spawn(
        name: &str,
        argv: &[String],
        work_dir: Option<&Path>,
        sink: Arc<StderrSink>,
        cancel: Receiver<()>,
    ) -> std::io::Result<Transport> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (tx, rx): (Sender<String>, Receiver<String>) = bounded(1024);
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            // dropping tx disconnects the channel: ChannelClosed at the reader
        });

        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                sink.write(&line);
            }
        });

        Ok(Transport {
            name: name.to_string(),
            child,
            stdin,
            lines: rx,
            cancel,
        })
    }

    /// Send one command and read the full response frame before `timeout`
    /// elapses. The empty line terminating the frame is consumed.
    pub fn send(&mut self, command: &str, timeout: Duration) -> Result<String, GtpError> {
        trace!("{} < {command}", self.name);
        writeln!(self.stdin, "{command}").map_err(|_| GtpError::ChannelClosed)?;
        self.stdin.flush().map_err(|_| GtpError::ChannelClosed)?;

        let deadline = Instant::now() + timeout;
        let mut content: Vec<String> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(self.lines) -> line => match line {
                    Ok(line) => {
                        let line = line.trim_end_matches('\r');
                        if line.trim().is_empty() {
                            if !content.is_empty() {
                                break;
                            }
                        } else {
                            content.push(line.to_string());
                        }
                    }
                    Err(_) => return Err(GtpError::ChannelClosed),
                },
                recv(self.cancel) -> _ => return Err(GtpError::Cancelled),
                default(remaining) => return Err(GtpError::Timeout(timeout.as_secs_f64())),
            }
        }

        let body = parse_frame(&content)?;
        trace!("{} > {body}", self.name);
        Ok(body)
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Reap the child: give it `grace` to exit on its own, then kill.
    pub fn reap(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = writeln!(self.stdin, "quit");
            let _ = self.stdin.flush();
            self.reap(Duration::from_millis(300));
        }
    }
}

/// Strip the status character and optional id from a received frame, and
/// return the response body. A `?` status surfaces as [`GtpError::EngineError`].
fn parse_frame(content: &[String]) -> Result<String, GtpError> {
    let first = content.first().map(String::as_str).unwrap_or("");
    let mut chars = first.chars();
    let status = match chars.next() {
        Some(c @ ('=' | '?')) => c,
        _ => return Err(GtpError::MalformedFrame(first.to_string())),
    };
    let rest = chars.as_str();
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut body = rest.trim().to_string();
    for line in &content[1..] {
        body.push('\n');
        body.push_str(line);
    }
    let body = body.trim().to_string();
    match status {
        '=' => Ok(body),
        _ => Err(GtpError::EngineError(body)),
    }
}

/// Sleep that wakes early when the cancellation token trips.
pub fn wait(d: Duration, cancel: &Receiver<()>) -> Result<(), GtpError> {
    if d.is_zero() {
        return Ok(());
    }
    match cancel.recv_timeout(d) {
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(()),
        _ => Err(GtpError::Cancelled),
    }
}
