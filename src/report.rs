use crate::config::MatchPlan;
use crate::game::{GameOutcome, GameRecord};
use crate::go::Color;
use crate::sgf;
use chrono::Local;
use log::error;
use std::fs::{File, OpenOptions};
use std::io::{Error, Write};
use std::path::{Path, PathBuf};

pub fn timestamp() -> String {
    Local::now().format("%y%m%d-%H:%M:%S").to_string()
}

/// The human-oriented `.run` trace: supervisor events, restarts, notes.
/// Flushed per line so an abrupt end leaves a consistent prefix.
pub struct RunLog {
    file: File,
}

impl RunLog {
    pub fn open(path: &Path) -> Result<RunLog, Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RunLog { file })
    }

    pub fn note(&mut self, message: &str) {
        if writeln!(self.file, "{} {message}", timestamp())
            .and_then(|_| self.file.flush())
            .is_err()
        {
            error!("cannot write run trace: {message}");
        }
    }
}

/// Writers for the per-match artifact family, named after the match and
/// living in the match directory. Appends only; every game is flushed.
pub struct Emitter {
    log: File,
    mvtimes: File,
    run: RunLog,
    sgf_dir: Option<PathBuf>,
    match_name: String,
}

impl Emitter {
    pub fn open(match_dir: &Path, plan: &MatchPlan) -> Result<Emitter, Error> {
        // not Path::with_extension: match names may contain dots
        let append = |ext: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(match_dir.join(format!("{}.{ext}", plan.match_name)))
        };
        Ok(Emitter {
            log: append("log")?,
            mvtimes: append("mvtimes")?,
            run: RunLog::open(&match_dir.join(format!("{}.run", plan.match_name)))?,
            sgf_dir: (!plan.disable_sgf).then(|| match_dir.join("SGFs")),
            match_name: plan.match_name.clone(),
        })
    }

    pub fn run_log(&mut self) -> &mut RunLog {
        &mut self.run
    }

    /// Append one completed game to `.log`, `.mvtimes` and (unless disabled)
    /// `SGFs/`.
    pub fn append(&mut self, plan: &MatchPlan, record: &GameRecord) -> Result<(), Error> {
        writeln!(self.log, "{}", log_line(plan, record))?;
        self.log.flush()?;
        writeln!(self.mvtimes, "{}", mvtimes_line(plan, record))?;
        self.mvtimes.flush()?;
        if let Some(dir) = &self.sgf_dir {
            let path = dir.join(format!("{}-{}.sgf", self.match_name, record.seq));
            std::fs::write(&path, sgf::render(plan, record))?;
        }
        Ok(())
    }
}

fn seq_width(plan: &MatchPlan) -> usize {
    plan.num_games.to_string().len()
}

fn name_width(plan: &MatchPlan) -> usize {
    plan.engine_a
        .name
        .len()
        .max(plan.engine_b.name.len())
        .max("Jigo".len())
}

/// Which colour engine A held in this game.
fn color_of_a(plan: &MatchPlan, record: &GameRecord) -> Color {
    if record.black == plan.engine_a.name {
        Color::Black
    } else {
        Color::White
    }
}

/// The winner column: an engine name, or a marker for the no-winner
/// outcomes.
fn winner_token<'a>(record: &'a GameRecord) -> &'a str {
    match &record.outcome {
        GameOutcome::Resign { winner }
        | GameOutcome::Time { winner }
        | GameOutcome::Score { winner, .. } => match winner {
            Color::Black => &record.black,
            Color::White => &record.white,
        },
        GameOutcome::Jigo => "Jigo",
        GameOutcome::Passed => "None",
        GameOutcome::Unfinished => "UFIN",
        GameOutcome::Illegal { .. }
        | GameOutcome::ScorerFailure
        | GameOutcome::EngineFailure => "ERR",
    }
}

/// One machine-parseable result line.
pub fn log_line(plan: &MatchPlan, record: &GameRecord) -> String {
    let a_color = color_of_a(plan, record);
    let b_color = a_color.opponent();
    let stats_a = record.side_stats(a_color);
    let stats_b = record.side_stats(b_color);
    let violations = if record.violations.is_empty() {
        "None".to_string()
    } else {
        record
            .violations
            .iter()
            .map(|v| format!("{} {}[{:.3}]", v.engine, v.move_num, v.elapsed.as_secs_f64()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let nw = name_width(plan);
    format!(
        "{ts} [#{seq:0sw$}] {a} {ac} {b} {bc} = {winner:>nw$} {reason:<6} {moves:3} {mva:3} {mvb:3} \
         {tta:11.6} {avga:9.6} {maxa:9.6} {ttb:11.6} {avgb:9.6} {maxb:9.6} VIO: {violations}",
        ts = record.started.format("%y%m%d-%H:%M:%S"),
        seq = record.seq,
        sw = seq_width(plan),
        a = plan.engine_a.name,
        ac = a_color,
        b = plan.engine_b.name,
        bc = b_color,
        winner = winner_token(record),
        reason = record.outcome.reason(),
        moves = record.total_moves(),
        mva = stats_a.moves,
        mvb = stats_b.moves,
        tta = stats_a.total.as_secs_f64(),
        avga = stats_a.avg(),
        maxa = stats_a.max.as_secs_f64(),
        ttb = stats_b.total.as_secs_f64(),
        avgb = stats_b.avg(),
        maxb = stats_b.max.as_secs_f64(),
    )
}

/// One `.mvtimes` line: the move sequence with per-move thinking times.
pub fn mvtimes_line(plan: &MatchPlan, record: &GameRecord) -> String {
    let mut line = format!("[#{:0w$}]", record.seq, w = seq_width(plan));
    for m in &record.moves {
        line.push_str(&format!(" {}[{:.3}]", m.vertex, m.elapsed.as_secs_f64()));
    }
    line
}
