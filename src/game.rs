use crate::config::MatchPlan;
use crate::engine::Engine;
use crate::go::{Color, Vertex};
use crate::gtp::{self, GtpError};
use crate::report::RunLog;
use crate::tc::{Clock, StepResult};
use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use log::info;
use regex::Regex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum GameOutcome {
    Resign { winner: Color },
    Time { winner: Color },
    Score { winner: Color, margin: String },
    Jigo,
    /// Consecutive passes with no scorer configured.
    Passed,
    Illegal { offender: Color },
    ScorerFailure,
    EngineFailure,
    Unfinished,
}

impl GameOutcome {
    pub fn winner(&self) -> Option<Color> {
        match self {
            GameOutcome::Resign { winner }
            | GameOutcome::Time { winner }
            | GameOutcome::Score { winner, .. } => Some(*winner),
            _ => None,
        }
    }

    /// The reason column of the result line.
    pub fn reason(&self) -> String {
        match self {
            GameOutcome::Resign { winner } => format!("{winner}+Resign"),
            GameOutcome::Time { winner } => format!("{winner}+Time"),
            GameOutcome::Score { winner, margin } => format!("{winner}+{margin}"),
            GameOutcome::Jigo => "==".to_string(),
            GameOutcome::Passed => "XX".to_string(),
            GameOutcome::Illegal { .. } => "IL".to_string(),
            GameOutcome::ScorerFailure => "SD".to_string(),
            GameOutcome::EngineFailure => "EE".to_string(),
            GameOutcome::Unfinished => "UF".to_string(),
        }
    }

    /// SGF `RE[..]` property value.
    pub fn sgf_result(&self) -> String {
        match self {
            GameOutcome::Resign { winner } => format!("{winner}+Resign"),
            GameOutcome::Time { winner } => format!("{winner}+Time"),
            GameOutcome::Score { winner, margin } => format!("{winner}+{margin}"),
            GameOutcome::Jigo => "0".to_string(),
            _ => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub color: Color,
    pub vertex: Vertex,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub engine: String,
    pub move_num: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SideStats {
    pub moves: u32,
    pub total: Duration,
    pub max: Duration,
}

impl SideStats {
    pub fn avg(&self) -> f64 {
        if self.moves == 0 {
            0.0
        } else {
            self.total.as_secs_f64() / self.moves as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameRecord {
    pub seq: u32,
    pub started: DateTime<Local>,
    pub black: String,
    pub white: String,
    pub outcome: GameOutcome,
    pub moves: Vec<MoveRecord>,
    pub violations: Vec<Violation>,
}

impl GameRecord {
    /// Move count for the result line; a final `resign` is not a move.
    pub fn total_moves(&self) -> usize {
        match self.outcome {
            GameOutcome::Resign { .. } => self.moves.len().saturating_sub(1),
            _ => self.moves.len(),
        }
    }

    pub fn side_stats(&self, color: Color) -> SideStats {
        let mut stats = SideStats::default();
        for m in self.moves.iter().filter(|m| m.color == color) {
            stats.moves += 1;
            stats.total += m.elapsed;
            stats.max = stats.max.max(m.elapsed);
        }
        stats
    }
}

/// A scorer engine spawned on first use and reused across the games of a
/// match.
pub struct ExternalScorer {
    engine: Engine,
    started: bool,
}

impl ExternalScorer {
    pub fn new(engine: Engine) -> ExternalScorer {
        ExternalScorer {
            engine,
            started: false,
        }
    }

    fn acquire(&mut self, run: &mut RunLog) -> Result<&mut Engine, GtpError> {
        if !self.started {
            self.engine.start(run)?;
            self.started = true;
        } else if !self.engine.healthy() || !self.engine.is_alive() {
            self.engine.restart("scorer unhealthy", run)?;
        }
        Ok(&mut self.engine)
    }

    pub fn quit(&mut self) {
        if self.started {
            self.engine.quit();
        }
    }
}

pub enum ScorerRef<'a> {
    None,
    /// One of the playing engines scores its own board.
    Player(Color),
    External(&'a mut ExternalScorer),
}

/// Run one game. Both engines must be started; the caller decides colour
/// assignment and restarts anything this marks as poisoned.
pub fn play(
    seq: u32,
    black: &mut Engine,
    white: &mut Engine,
    scorer: ScorerRef<'_>,
    plan: &MatchPlan,
    cancel: &Receiver<()>,
    run: &mut RunLog,
) -> GameRecord {
    let started = Local::now();
    let black_name = black.name().to_string();
    let white_name = white.name().to_string();
    let mut moves: Vec<MoveRecord> = Vec::new();
    let mut violations: Vec<Violation> = Vec::new();
    let mut scorer = Some(scorer);

    let outcome = run_moves(
        black,
        white,
        &mut scorer,
        plan,
        cancel,
        run,
        &mut moves,
        &mut violations,
    );

    if outcome != GameOutcome::Unfinished {
        for eng in [&mut *black, &mut *white] {
            if eng.healthy() {
                let post = eng.spec().post_game.clone();
                eng.run_custom(&post, "PostGame", run);
            }
        }
    }

    info!(
        "game {seq}: {} vs {}: {}",
        black_name,
        white_name,
        outcome.reason()
    );
    GameRecord {
        seq,
        started,
        black: black_name,
        white: white_name,
        outcome,
        moves,
        violations,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_moves(
    black: &mut Engine,
    white: &mut Engine,
    scorer: &mut Option<ScorerRef<'_>>,
    plan: &MatchPlan,
    cancel: &Receiver<()>,
    run: &mut RunLog,
    moves: &mut Vec<MoveRecord>,
    violations: &mut Vec<Violation>,
) -> GameOutcome {
    for eng in [&mut *black, &mut *white] {
        if let Err(e) = eng.game_setup(run) {
            return setup_failure(eng, "game setup", e, run);
        }
        let pre = eng.spec().pre_game.clone();
        eng.run_custom(&pre, "PreGame", run);
    }

    let time = plan.settings.time;
    let mut clocks = [Clock::new(time), Clock::new(time)];
    let timeouts = plan.timeouts;
    let mut consecutive_passes = 0u32;
    let mut mover = Color::Black;

    loop {
        if cancelled(cancel) {
            return GameOutcome::Unfinished;
        }
        let idx = side_index(mover);
        let (eng, other) = match mover {
            Color::Black => (&mut *black, &mut *white),
            Color::White => (&mut *white, &mut *black),
        };

        if let Some((s, m)) = clocks[idx].time_left_args() {
            if let Err(e) = eng.command(&format!("time_left {} {s} {m}", mover.letter())) {
                return setup_failure(eng, "time_left", e, run);
            }
        }

        let deadline = match clocks[idx].budget() {
            Some(budget) => budget + timeouts.genmove_extra,
            None => timeouts.genmove_untimed,
        };
        let before = Instant::now();
        let response = eng.send(&format!("genmove {}", mover.letter()), deadline);
        let elapsed = before.elapsed();

        let body = match response {
            Ok(body) => body,
            Err(GtpError::Cancelled) => return GameOutcome::Unfinished,
            Err(GtpError::Timeout(_)) => {
                // the budget guarantees this is past any clock violation
                eng.poison();
                run.note(&format!(
                    "{}: no move after {:.3}s, flagging",
                    eng.name(),
                    elapsed.as_secs_f64()
                ));
                violations.push(Violation {
                    engine: eng.name().to_string(),
                    move_num: moves.len() as u32 + 1,
                    elapsed,
                });
                return GameOutcome::Time {
                    winner: mover.opponent(),
                };
            }
            Err(e) => {
                eng.poison();
                run.note(&format!("{}: genmove failed: {e}", eng.name()));
                return GameOutcome::EngineFailure;
            }
        };

        let step = clocks[idx].deduct(elapsed);
        let Some(vertex) = Vertex::parse(&body, plan.settings.board_size) else {
            run.note(&format!("{}: unparseable move {body:?}", eng.name()));
            return GameOutcome::EngineFailure;
        };
        moves.push(MoveRecord {
            color: mover,
            vertex,
            elapsed,
        });

        if step == StepResult::Violation {
            violations.push(Violation {
                engine: eng.name().to_string(),
                move_num: moves.len() as u32,
                elapsed,
            });
            if plan.enforce_time {
                return GameOutcome::Time {
                    winner: mover.opponent(),
                };
            }
        }

        match vertex {
            Vertex::Resign => {
                return GameOutcome::Resign {
                    winner: mover.opponent(),
                }
            }
            Vertex::Pass => {
                consecutive_passes += 1;
                if consecutive_passes >= plan.consecutive_passes {
                    let scorer = scorer.take().expect("scorer consumed once");
                    return score_game(scorer, black, white, moves, plan, run);
                }
            }
            Vertex::Point { .. } => consecutive_passes = 0,
        }

        match other.command(&format!("play {} {vertex}", mover.letter())) {
            Ok(_) => {}
            Err(GtpError::EngineError(reply)) if reply.to_lowercase().contains("illegal") => {
                return GameOutcome::Illegal { offender: mover };
            }
            Err(e) => {
                return setup_failure(other, "play", e, run);
            }
        }

        if gtp::wait(plan.move_wait, cancel).is_err() {
            return GameOutcome::Unfinished;
        }
        mover = mover.opponent();
    }
}

/// Failure of any command other than `genmove`/`play`-illegal: a timeout
/// leaves the game unfinished, everything else is an engine error. Either
/// way the engine is poisoned for the match runner to restart.
fn setup_failure(eng: &mut Engine, what: &str, e: GtpError, run: &mut RunLog) -> GameOutcome {
    match e {
        GtpError::Cancelled => GameOutcome::Unfinished,
        GtpError::Timeout(_) => {
            eng.poison();
            run.note(&format!("{}: {what} timed out", eng.name()));
            GameOutcome::Unfinished
        }
        e => {
            eng.poison();
            run.note(&format!("{}: {what} failed: {e}", eng.name()));
            GameOutcome::EngineFailure
        }
    }
}

fn score_game(
    scorer: ScorerRef<'_>,
    black: &mut Engine,
    white: &mut Engine,
    moves: &[MoveRecord],
    plan: &MatchPlan,
    run: &mut RunLog,
) -> GameOutcome {
    let scorer_timeout = plan.timeouts.scorer;
    let eng = match scorer {
        ScorerRef::None => return GameOutcome::Passed,
        ScorerRef::Player(color) => match color {
            Color::Black => &mut *black,
            Color::White => &mut *white,
        },
        ScorerRef::External(slot) => {
            let eng = match slot.acquire(run) {
                Ok(eng) => eng,
                Err(GtpError::Cancelled) => return GameOutcome::Unfinished,
                Err(e) => {
                    run.note(&format!("scorer failed to start: {e}"));
                    return GameOutcome::ScorerFailure;
                }
            };
            // the scorer has not seen the game: replay it from scratch
            if let Err(e) = replay(eng, moves, run) {
                if matches!(e, GtpError::Cancelled) {
                    return GameOutcome::Unfinished;
                }
                eng.poison();
                run.note(&format!("{}: replay for scoring failed: {e}", eng.name()));
                return GameOutcome::ScorerFailure;
            }
            eng
        }
    };

    match eng.send("final_score", scorer_timeout) {
        Ok(body) => match parse_score(&body) {
            Some(outcome) => outcome,
            None => {
                run.note(&format!("{}: unrecognized score {body:?}", eng.name()));
                GameOutcome::ScorerFailure
            }
        },
        Err(GtpError::Cancelled) => GameOutcome::Unfinished,
        Err(e) => {
            eng.poison();
            run.note(&format!("{}: final_score failed: {e}", eng.name()));
            GameOutcome::ScorerFailure
        }
    }
}

fn replay(eng: &mut Engine, moves: &[MoveRecord], run: &mut RunLog) -> Result<(), GtpError> {
    eng.game_setup(run)?;
    for m in moves {
        eng.command(&format!("play {} {}", m.color.letter(), m.vertex))?;
    }
    Ok(())
}

/// `W+7.5`, `B+0.5`, `0`, `draw` and friends.
fn parse_score(body: &str) -> Option<GameOutcome> {
    let body = body.trim();
    if body == "0" || body.eq_ignore_ascii_case("draw") || body.eq_ignore_ascii_case("jigo") {
        return Some(GameOutcome::Jigo);
    }
    let re = Regex::new(r"^([WwBb])\+(\S+)$").unwrap();
    let captures = re.captures(body)?;
    let winner = match &captures[1] {
        "W" | "w" => Color::White,
        _ => Color::Black,
    };
    Some(GameOutcome::Score {
        winner,
        margin: captures[2].to_string(),
    })
}

fn side_index(color: Color) -> usize {
    match color {
        Color::Black => 0,
        Color::White => 1,
    }
}

fn cancelled(cancel: &Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(crossbeam_channel::TryRecvError::Empty)
    )
}
