use crate::config::{MatchPlan, ScorerChoice};
use crate::engine::{Engine, TemplateVars};
use crate::game::{self, ExternalScorer, GameOutcome, GameRecord, ScorerRef};
use crate::go::Color;
use crate::gtp;
use crate::report::{Emitter, RunLog};
use crate::session::Session;
use chrono::Local;
use crossbeam_channel::Receiver;
use log::{error, info};
use std::time::Duration;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MatchStatus {
    Complete,
    /// Cancellation tripped; the match stopped cleanly but early.
    Interrupted,
    /// An engine could not be kept running; the tail of the match was
    /// recorded as unfinished.
    Failed,
}

/// Play (or finish playing) one match. Both engines live for the whole
/// match; the scorer is spawned lazily and all children are reaped on every
/// exit path.
pub fn run(plan: &MatchPlan, session: &Session, cancel: &Receiver<()>) -> anyhow::Result<MatchStatus> {
    if session.completed >= plan.num_games {
        info!(
            "match {}: all {} games already played, nothing to do",
            plan.match_name, plan.num_games
        );
        return Ok(MatchStatus::Complete);
    }

    let vars = TemplateVars {
        match_dir: session.match_dir.clone(),
        board_size: plan.settings.board_size,
        komi: plan.settings.komi,
        time: plan.settings.time,
    };
    let mut emitter = Emitter::open(&session.match_dir, plan)?;
    {
        let run = emitter.run_log();
        run.note(&format!(
            "dumbarb {}: match {}, {} games, {} on a {}x{} board",
            env!("CARGO_PKG_VERSION"),
            plan.match_name,
            plan.num_games,
            plan.settings.time.system,
            plan.settings.board_size,
            plan.settings.board_size,
        ));
        if session.completed > 0 {
            run.note(&format!(
                "resuming after {} already-recorded games",
                session.completed
            ));
        }
    }

    let mut engine_a = Engine::new(plan.engine_a.clone(), plan.timeouts, vars.clone(), cancel.clone());
    let mut engine_b = Engine::new(plan.engine_b.clone(), plan.timeouts, vars.clone(), cancel.clone());
    let mut scorer: Option<ExternalScorer> = match &plan.scorer {
        Some(ScorerChoice::External(spec)) => Some(ExternalScorer::new(Engine::new(
            spec.clone(),
            plan.timeouts,
            vars.clone(),
            cancel.clone(),
        ))),
        _ => None,
    };

    let status = play_games(
        plan,
        session,
        cancel,
        &mut emitter,
        &mut engine_a,
        &mut engine_b,
        &mut scorer,
    )?;

    if status == MatchStatus::Complete {
        for eng in [&mut engine_a, &mut engine_b] {
            if eng.healthy() {
                let post = eng.spec().post_match.clone();
                eng.run_custom(&post, "PostMatch", emitter.run_log());
            }
        }
    }
    engine_a.quit();
    engine_b.quit();
    if let Some(scorer) = scorer.as_mut() {
        scorer.quit();
    }
    emitter.run_log().note(&format!(
        "match {}: {:?} ({} restarts {}, {} restarts {})",
        plan.match_name,
        status,
        engine_a.name(),
        engine_a.restart_count,
        engine_b.name(),
        engine_b.restart_count,
    ));
    Ok(status)
}

#[allow(clippy::too_many_arguments)]
fn play_games(
    plan: &MatchPlan,
    session: &Session,
    cancel: &Receiver<()>,
    emitter: &mut Emitter,
    engine_a: &mut Engine,
    engine_b: &mut Engine,
    scorer: &mut Option<ExternalScorer>,
) -> anyhow::Result<MatchStatus> {
    let first = session.first_game();

    if cancelled(cancel) {
        return Ok(MatchStatus::Interrupted);
    }
    if !start_fresh(engine_a, emitter.run_log()) || !start_fresh(engine_b, emitter.run_log()) {
        if cancelled(cancel) {
            return Ok(MatchStatus::Interrupted);
        }
        pad_unfinished(plan, emitter, first)?;
        return Ok(MatchStatus::Failed);
    }
    let mut stats = MatchStats::new(plan);

    if gtp::wait(plan.match_wait, cancel).is_err() {
        return Ok(MatchStatus::Interrupted);
    }

    for seq in first..=plan.num_games {
        if seq > first && gtp::wait(plan.game_wait, cancel).is_err() {
            return Ok(MatchStatus::Interrupted);
        }

        // engine A takes black in odd-numbered games
        let a_color = if seq % 2 == 1 {
            Color::Black
        } else {
            Color::White
        };
        set_game_stderr(engine_a, plan, session, seq);
        set_game_stderr(engine_b, plan, session, seq);

        let scorer_ref = match (&plan.scorer, scorer.as_mut()) {
            (Some(ScorerChoice::Player(name)), _) => {
                if *name == plan.engine_a.name {
                    ScorerRef::Player(a_color)
                } else {
                    ScorerRef::Player(a_color.opponent())
                }
            }
            (Some(ScorerChoice::External(_)), Some(slot)) => ScorerRef::External(slot),
            _ => ScorerRef::None,
        };

        let record = {
            let (black, white) = match a_color {
                Color::Black => (&mut *engine_a, &mut *engine_b),
                Color::White => (&mut *engine_b, &mut *engine_a),
            };
            game::play(seq, black, white, scorer_ref, plan, cancel, emitter.run_log())
        };
        stats.absorb(&record);
        emitter.append(plan, &record)?;

        if record.outcome == GameOutcome::Unfinished && cancelled(cancel) {
            return Ok(MatchStatus::Interrupted);
        }

        for eng in [&mut *engine_a, &mut *engine_b] {
            if !ensure_running(eng, emitter.run_log()) {
                if cancelled(cancel) {
                    return Ok(MatchStatus::Interrupted);
                }
                if seq < plan.num_games {
                    pad_unfinished(plan, emitter, seq + 1)?;
                }
                return Ok(MatchStatus::Failed);
            }
        }
    }

    stats.print(emitter.run_log());
    Ok(MatchStatus::Complete)
}

/// Initial spawn with the one retry the plan allows.
fn start_fresh(eng: &mut Engine, run: &mut RunLog) -> bool {
    match eng.start(run) {
        Ok(()) => true,
        Err(e) => {
            error!("{}: failed to start: {e}", eng.name());
            run.note(&format!("{}: failed to start: {e}", eng.name()));
            eng.restart("start failure", run).is_ok()
        }
    }
}

/// Restart a dead or poisoned engine between games, retrying once.
fn ensure_running(eng: &mut Engine, run: &mut RunLog) -> bool {
    if eng.healthy() && eng.is_alive() {
        return true;
    }
    let reason = if eng.healthy() {
        "engine process died"
    } else {
        "engine channel poisoned"
    };
    if eng.restart(reason, run).is_ok() {
        return true;
    }
    if eng.restart("previous restart failed", run).is_ok() {
        return true;
    }
    error!("{}: cannot be restarted, giving up on the match", eng.name());
    run.note(&format!("{}: cannot be restarted, terminating match", eng.name()));
    false
}

/// Record the tail of a terminated match as unfinished games so the log
/// still carries one line per game.
fn pad_unfinished(plan: &MatchPlan, emitter: &mut Emitter, from: u32) -> anyhow::Result<()> {
    for seq in from..=plan.num_games {
        let (black, white) = if seq % 2 == 1 {
            (plan.engine_a.name.clone(), plan.engine_b.name.clone())
        } else {
            (plan.engine_b.name.clone(), plan.engine_a.name.clone())
        };
        let record = GameRecord {
            seq,
            started: Local::now(),
            black,
            white,
            outcome: GameOutcome::Unfinished,
            moves: Vec::new(),
            violations: Vec::new(),
        };
        emitter.append(plan, &record)?;
    }
    Ok(())
}

fn set_game_stderr(eng: &Engine, plan: &MatchPlan, session: &Session, seq: u32) {
    let path = session
        .match_dir
        .join("stderr")
        .join(format!("{}-{}-{}.err", plan.match_name, seq, eng.name()));
    eng.set_game_stderr(Some(&path));
}

fn cancelled(cancel: &Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(crossbeam_channel::TryRecvError::Empty)
    )
}

/// Whole-match totals printed when the match completes.
struct MatchStats {
    names: [String; 2],
    wins: [u32; 2],
    games: [u32; 2],
    as_white: [u32; 2],
    wins_as_white: [u32; 2],
    wins_as_black: [u32; 2],
    max_think: [Duration; 2],
}

impl MatchStats {
    fn new(plan: &MatchPlan) -> MatchStats {
        MatchStats {
            names: [plan.engine_a.name.clone(), plan.engine_b.name.clone()],
            wins: [0; 2],
            games: [0; 2],
            as_white: [0; 2],
            wins_as_white: [0; 2],
            wins_as_black: [0; 2],
            max_think: [Duration::ZERO; 2],
        }
    }

    fn absorb(&mut self, record: &GameRecord) {
        for i in 0..2 {
            let color = if record.black == self.names[i] {
                Color::Black
            } else {
                Color::White
            };
            self.games[i] += 1;
            if color == Color::White {
                self.as_white[i] += 1;
            }
            if record.outcome.winner() == Some(color) {
                self.wins[i] += 1;
                match color {
                    Color::White => self.wins_as_white[i] += 1,
                    Color::Black => self.wins_as_black[i] += 1,
                }
            }
            let max = record.side_stats(color).max;
            self.max_think[i] = self.max_think[i].max(max);
        }
    }

    fn print(&self, run: &mut RunLog) {
        eprintln!("match ended; overall stats:");
        for i in 0..2 {
            let line = format!(
                "{}: {} wins of {} games ({} as W of {}, {} as B of {}), max time/move {:.6}s",
                self.names[i],
                self.wins[i],
                self.games[i],
                self.wins_as_white[i],
                self.as_white[i],
                self.wins_as_black[i],
                self.games[i] - self.as_white[i],
                self.max_think[i].as_secs_f64(),
            );
            eprintln!("{line}");
            run.note(&line);
        }
    }
}
