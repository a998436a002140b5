use crate::gtp::{GtpError, StderrSink, Transport};
use crate::report::RunLog;
use crate::tc::{TimeSettings, TimeSystem};
use crossbeam_channel::Receiver;
use log::{error, info};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Grace given to a child after `quit` before it is killed.
pub const QUIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSpec {
    pub name: String,
    /// Command template; may contain `{name}`, `{matchdir}`, `{boardsize}`,
    /// `{komi}`, `{maintime}`, `{periodtime}`, `{periodcount}`, `{timesys}`.
    pub cmd: String,
    pub work_dir: Option<PathBuf>,
    pub quiet: bool,
    pub log_stderr: bool,
    pub gtp_initial_timeout: Option<Duration>,
    pub pre_match: Vec<String>,
    pub post_match: Vec<String>,
    pub pre_game: Vec<String>,
    pub post_game: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GtpTimeouts {
    /// Ordinary commands.
    pub command: Duration,
    /// The scorer's `final_score`.
    pub scorer: Duration,
    /// Slack added on top of the clock budget for `genmove`.
    pub genmove_extra: Duration,
    /// `genmove` when no clock is being kept.
    pub genmove_untimed: Duration,
}

impl Default for GtpTimeouts {
    fn default() -> GtpTimeouts {
        GtpTimeouts {
            command: Duration::from_secs(10),
            scorer: Duration::from_secs(30),
            genmove_extra: Duration::from_secs(15),
            genmove_untimed: Duration::from_secs(600),
        }
    }
}

impl GtpTimeouts {
    /// Handshake timeout: engines may be slow to come up.
    pub fn initial(&self, spec: &EngineSpec) -> Duration {
        spec.gtp_initial_timeout
            .unwrap_or_else(|| self.command.max(Duration::from_secs(15)))
    }
}

/// Values substituted into command templates.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub match_dir: PathBuf,
    pub board_size: u8,
    pub komi: f64,
    pub time: TimeSettings,
}

impl TemplateVars {
    fn expand(&self, name: &str, template: &str) -> Result<String, String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(k) => key.push(k),
                            None => return Err(format!("unterminated placeholder in {template:?}")),
                        }
                    }
                    let value = match key.as_str() {
                        "name" => name.to_string(),
                        "matchdir" => self.match_dir.display().to_string(),
                        "boardsize" => self.board_size.to_string(),
                        "komi" => self.komi.to_string(),
                        "maintime" => self.time.main_time.as_secs().to_string(),
                        "periodtime" => self.time.period_time.as_secs().to_string(),
                        "periodcount" => self.time.period_count.to_string(),
                        "timesys" => self.time.system.to_string(),
                        _ => return Err(format!("unknown placeholder {{{key}}}")),
                    };
                    out.push_str(&value);
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }
}

/// Split a command line into argv, honouring single and double quotes.
pub fn split_command(s: &str) -> Vec<String> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        argv.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        argv.push(current);
    }
    argv
}

/// Supervisor for a single engine subprocess. Restarting replaces the child
/// but keeps the spec, the stderr sink and the restart counter.
pub struct Engine {
    spec: EngineSpec,
    timeouts: GtpTimeouts,
    vars: TemplateVars,
    cancel: Receiver<()>,
    sink: Arc<StderrSink>,
    transport: Option<Transport>,
    pub reported_name: String,
    pub reported_version: String,
    supported: HashSet<String>,
    pub restart_count: u32,
    pre_match_sent: bool,
    healthy: bool,
}

impl Engine {
    pub fn new(
        spec: EngineSpec,
        timeouts: GtpTimeouts,
        vars: TemplateVars,
        cancel: Receiver<()>,
    ) -> Engine {
        let sink = StderrSink::new(&spec.name, !spec.quiet);
        Engine {
            spec,
            timeouts,
            vars,
            cancel,
            sink,
            transport: None,
            reported_name: String::new(),
            reported_version: String::new(),
            supported: HashSet::new(),
            restart_count: 0,
            pre_match_sent: false,
            healthy: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    pub fn supports(&self, command: &str) -> bool {
        self.supported.contains(command)
    }

    pub fn healthy(&self) -> bool {
        self.healthy
    }

    /// Mark the channel poisoned; the match runner restarts the engine
    /// between games.
    pub fn poison(&mut self) {
        self.healthy = false;
    }

    pub fn is_alive(&mut self) -> bool {
        match self.transport.as_mut() {
            Some(t) => t.is_alive(),
            None => false,
        }
    }

    /// Spawn the child and perform the GTP handshake. `PreMatch` commands
    /// are sent on the first successful start only.
    pub fn start(&mut self, run: &mut RunLog) -> Result<(), GtpError> {
        let cmdline = self
            .vars
            .expand(&self.spec.name, &self.spec.cmd)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let argv = split_command(&cmdline);
        if argv.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{}: empty command line", self.spec.name),
            )
            .into());
        }
        info!("{}: starting: {cmdline}", self.spec.name);
        let transport = Transport::spawn(
            &self.spec.name,
            &argv,
            self.spec.work_dir.as_deref(),
            self.sink.clone(),
            self.cancel.clone(),
        )?;
        self.transport = Some(transport);

        let initial = self.timeouts.initial(&self.spec);
        let commands = self.send("list_commands", initial)?;
        self.supported = commands
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();

        self.reported_name = match self.send("name", self.timeouts.command) {
            Ok(body) if !body.is_empty() => body,
            Ok(_) | Err(GtpError::EngineError(_)) => self.spec.name.clone(),
            Err(e) => return Err(e),
        };
        self.reported_version = match self.send("version", self.timeouts.command) {
            Ok(body) => body,
            Err(GtpError::EngineError(_)) => String::from("?"),
            Err(e) => return Err(e),
        };
        run.note(&format!(
            "{}: up as {} {} ({cmdline})",
            self.spec.name, self.reported_name, self.reported_version
        ));
        self.healthy = true;

        if !self.pre_match_sent {
            self.pre_match_sent = true;
            let pre_match = self.spec.pre_match.clone();
            self.run_custom(&pre_match, "PreMatch", run);
        }
        Ok(())
    }

    /// Kill the child and start over. The match runner owns the retry
    /// policy; a failure here surfaces to it.
    pub fn restart(&mut self, reason: &str, run: &mut RunLog) -> Result<(), GtpError> {
        self.restart_count += 1;
        run.note(&format!(
            "{}: restart #{} ({reason})",
            self.spec.name, self.restart_count
        ));
        self.transport = None; // drop: quit, short grace, then kill
        self.start(run).map_err(|e| {
            error!("{}: restart failed: {e}", self.spec.name);
            e
        })
    }

    pub fn send(&mut self, command: &str, timeout: Duration) -> Result<String, GtpError> {
        let transport = self.transport.as_mut().ok_or(GtpError::ChannelClosed)?;
        transport.send(command, timeout)
    }

    /// An ordinary command under the standard timeout.
    pub fn command(&mut self, command: &str) -> Result<String, GtpError> {
        self.send(command, self.timeouts.command)
    }

    pub fn timeouts(&self) -> GtpTimeouts {
        self.timeouts
    }

    /// Board, komi, time system and a clean board, in GTP terms. Engines
    /// without `kgs-time_settings` get the Japanese settings approximated as
    /// Canadian over the plain `time_settings` command.
    pub fn game_setup(&mut self, run: &mut RunLog) -> Result<(), GtpError> {
        let time = self.vars.time;
        let m = time.main_time.as_secs();
        let p = time.period_time.as_secs();
        let c = time.period_count;
        self.command(&format!("boardsize {}", self.vars.board_size))?;
        self.command(&format!("komi {}", self.vars.komi))?;
        match time.system {
            TimeSystem::Japanese if self.supports("kgs-time_settings") => {
                self.command(&format!("kgs-time_settings byoyomi {m} {p} {c}"))?;
            }
            TimeSystem::Japanese => {
                run.note(&format!(
                    "{}: no kgs-time_settings support, sending time_settings {m} {p} {c}",
                    self.spec.name
                ));
                self.command(&format!("time_settings {m} {p} {c}"))?;
            }
            TimeSystem::Canadian => {
                self.command(&format!("time_settings {m} {p} {c}"))?;
            }
            TimeSystem::Absolute => {
                // period time 0 is the GTP convention for absolute time
                self.command(&format!("time_settings {m} 0 0"))?;
            }
            TimeSystem::None => {
                // period time > 0 with count 0: no time limits
                self.command("time_settings 0 1 0")?;
            }
        }
        self.command("clear_board")?;
        Ok(())
    }

    /// Best-effort custom command list; failures are noted in the trace but
    /// never fail the caller.
    pub fn run_custom(&mut self, commands: &[String], label: &str, run: &mut RunLog) {
        for template in commands {
            let cmd = match self.vars.expand(&self.spec.name, template) {
                Ok(cmd) => cmd,
                Err(e) => {
                    run.note(&format!("{}: bad {label} command: {e}", self.spec.name));
                    continue;
                }
            };
            if let Err(e) = self.command(&cmd) {
                run.note(&format!(
                    "{}: {label} command {cmd:?} failed: {e}",
                    self.spec.name
                ));
            }
        }
    }

    /// Point per-game stderr capture at `path` (when `LogStdErr` is set).
    pub fn set_game_stderr(&self, path: Option<&Path>) {
        if self.spec.log_stderr {
            self.sink.set_file(path);
        }
    }

    /// Polite shutdown: `quit`, a grace period, then the axe.
    pub fn quit(&mut self) {
        if let Some(mut t) = self.transport.take() {
            let _ = t.send("quit", self.timeouts.command);
            t.reap(QUIT_GRACE);
        }
        self.healthy = false;
    }
}
