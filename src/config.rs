use crate::engine::{EngineSpec, GtpTimeouts};
use crate::go::MAX_BOARD_SIZE;
use crate::tc::{TimeSettings, TimeSystem};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct GameSettings {
    pub board_size: u8,
    pub komi: f64,
    pub time: TimeSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScorerChoice {
    /// `scorer = [EngineName]`: one of the players scores its own board.
    Player(String),
    /// A third engine, spawned lazily on the first passed-out game.
    External(EngineSpec),
}

/// A fully-validated match: the only thing the runner consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPlan {
    pub match_name: String,
    pub engine_a: EngineSpec,
    pub engine_b: EngineSpec,
    pub scorer: Option<ScorerChoice>,
    pub settings: GameSettings,
    pub num_games: u32,
    pub match_wait: Duration,
    pub game_wait: Duration,
    pub move_wait: Duration,
    pub timeouts: GtpTimeouts,
    pub consecutive_passes: u32,
    pub enforce_time: bool,
    pub disable_sgf: bool,
}

impl MatchPlan {
    pub fn load(path: &Path) -> Result<MatchPlan> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("match");
        MatchPlan::from_str(&text, stem)
            .with_context(|| format!("in config {}", path.display()))
    }

    pub fn from_str(text: &str, default_name: &str) -> Result<MatchPlan> {
        let ini = Ini::parse(text)?;
        let defaults = Section::empty();
        let global = ini.section("DEFAULT").unwrap_or(&defaults);

        let engines: Vec<&Section> = ini
            .sections
            .iter()
            .filter(|s| !s.name.eq_ignore_ascii_case("DEFAULT"))
            .collect();
        if engines.len() != 2 {
            bail!(
                "config must name exactly two engine sections, found {}",
                engines.len()
            );
        }
        for eng in &engines {
            if eng.name.split_whitespace().count() != 1 {
                bail!("engine name {:?} must not contain whitespace", eng.name);
            }
        }
        if engines[0].name == engines[1].name {
            bail!("engine sections must have distinct names");
        }

        let system = match global.get("timesys") {
            Some(v) => TimeSystem::parse(v)
                .with_context(|| format!("invalid timeSys {v:?}"))?,
            None => TimeSystem::Canadian,
        };
        let tolerance = global.parse_f64("timetolerance", 0.0)?;
        let time = TimeSettings {
            system,
            main_time: global.duration("maintime", 0.0)?,
            period_time: global.duration("periodtime", 5.0)?,
            period_count: global.parse_u32("periodcount", 1)?,
            tolerance: (tolerance >= 0.0).then(|| Duration::from_secs_f64(tolerance)),
        };
        if let Err(e) = time.validate() {
            bail!("{e}");
        }

        let board_size = global.parse_u32("boardsize", 19)?;
        if !(2..=MAX_BOARD_SIZE as u32).contains(&board_size) {
            bail!("boardSize {board_size} out of range");
        }
        let board_size = board_size as u8;

        let timeouts = GtpTimeouts {
            command: global.duration("gtptimeout", 10.0)?,
            scorer: global.duration("gtpscorertimeout", 30.0)?,
            genmove_extra: global.duration("gtpgenmoveextra", 15.0)?,
            genmove_untimed: global.duration("gtpuntimedtimeout", 600.0)?,
        };
        let initial_timeout = global
            .get("gtpinitialtimeout")
            .map(|v| parse_seconds("gtpInitialTimeout", v))
            .transpose()?;

        let engine_a = engine_spec(engines[0], initial_timeout)?;
        let engine_b = engine_spec(engines[1], initial_timeout)?;

        let scorer = match global.get("scorer") {
            None => None,
            Some(raw) => {
                let raw = raw.trim();
                let player = engines
                    .iter()
                    .find(|e| raw == format!("[{}]", e.name))
                    .map(|e| e.name.clone());
                match player {
                    Some(name) => Some(ScorerChoice::Player(name)),
                    None => Some(ScorerChoice::External(EngineSpec {
                        name: "scorer".to_string(),
                        cmd: raw.to_string(),
                        work_dir: global.get("scorerwkdir").map(PathBuf::from),
                        quiet: true,
                        log_stderr: false,
                        gtp_initial_timeout: initial_timeout,
                        ..EngineSpec::default()
                    })),
                }
            }
        };

        let num_games = global.parse_u32("numgames", 100)?;
        if num_games == 0 {
            bail!("numGames must be at least 1");
        }

        Ok(MatchPlan {
            match_name: global
                .get("matchname")
                .map(|s| s.to_string())
                .unwrap_or_else(|| default_name.to_string()),
            engine_a,
            engine_b,
            scorer,
            settings: GameSettings {
                board_size,
                komi: global.parse_f64("komi", 7.5)?,
                time,
            },
            num_games,
            match_wait: global.duration("matchwait", 0.5)?,
            game_wait: global.duration("gamewait", 0.5)?,
            move_wait: global.duration("movewait", 0.0)?,
            timeouts,
            consecutive_passes: global.parse_u32("consecutivepasses", 2)?.max(1),
            enforce_time: global.parse_bool("enforcetime", false)?,
            disable_sgf: global.parse_bool("disablesgf", false)?,
        })
    }
}

fn engine_spec(section: &Section, initial_timeout: Option<Duration>) -> Result<EngineSpec> {
    let cmd = section
        .get("cmd")
        .with_context(|| format!("engine [{}] has no cmd", section.name))?
        .to_string();
    let own_initial = section
        .get("gtpinitialtimeout")
        .map(|v| parse_seconds("gtpInitialTimeout", v))
        .transpose()?;
    Ok(EngineSpec {
        name: section.name.clone(),
        cmd,
        work_dir: section.get("wkdir").map(PathBuf::from),
        quiet: section.parse_bool("quiet", false)?,
        log_stderr: section.parse_bool("logstderr", false)?,
        gtp_initial_timeout: own_initial.or(initial_timeout),
        pre_match: section.command_list("prematch"),
        post_match: section.command_list("postmatch"),
        pre_game: section.command_list("pregame"),
        post_game: section.command_list("postgame"),
    })
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {key} value {value:?}"))?;
    if secs < 0.0 {
        bail!("{key} must not be negative");
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Minimal INI reader: `[section]` headers, `key = value` pairs,
/// `#`/`;` comment lines, inline `#` comments after whitespace.
/// Key lookup is case-insensitive.
struct Ini {
    sections: Vec<Section>,
}

struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn empty() -> Section {
        Section {
            name: String::new(),
            entries: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn parse_u32(&self, key: &str, default: u32) -> Result<u32> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid {key} value {v:?}")),
        }
    }

    fn parse_f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid {key} value {v:?}")),
        }
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool> {
        let Some(v) = self.get(key) else {
            return Ok(default);
        };
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("invalid {key} value {other:?}"),
        }
    }

    fn duration(&self, key: &str, default_secs: f64) -> Result<Duration> {
        match self.get(key) {
            None => Ok(Duration::from_secs_f64(default_secs)),
            Some(v) => parse_seconds(key, v),
        }
    }

    /// Semicolon-separated GTP command list.
    fn command_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Ini {
    fn parse(text: &str) -> Result<Ini> {
        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<usize> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                let idx = match sections.iter().position(|s| s.name == name) {
                    Some(idx) => idx,
                    None => {
                        sections.push(Section {
                            name,
                            entries: Vec::new(),
                        });
                        sections.len() - 1
                    }
                };
                current = Some(idx);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected key = value, got {raw:?}", lineno + 1);
            };
            let idx = match current {
                Some(idx) => idx,
                None => bail!("line {}: {raw:?} appears before any [section]", lineno + 1),
            };
            sections[idx]
                .entries
                .push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
        Ok(Ini { sections })
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Drop an inline comment: `#` only counts when it starts the line or
/// follows whitespace, so command lines may contain literal `#`.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with(';') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}
