use crate::config::MatchPlan;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Where a match writes its artifacts, and how much of it already exists.
#[derive(Debug, Clone)]
pub struct Session {
    pub match_dir: PathBuf,
    /// Games already present in the `.log` of a resumed match.
    pub completed: u32,
}

impl Session {
    pub fn first_game(&self) -> u32 {
        self.completed + 1
    }
}

/// Claim (or re-enter) the match directory under `outdir`. A fresh run
/// refuses to touch an existing directory unless `resume` picks up where the
/// `.log` ends or `force` wipes it.
pub fn prepare(outdir: &Path, plan: &MatchPlan, resume: bool, force: bool) -> Result<Session> {
    let match_dir = outdir.join(&plan.match_name);
    let log_path = match_dir.join(format!("{}.log", plan.match_name));

    let mut completed = 0;
    if match_dir.exists() {
        if force {
            fs::remove_dir_all(&match_dir)
                .with_context(|| format!("cannot clear {}", match_dir.display()))?;
        } else if resume {
            completed = count_lines(&log_path)?;
            if completed > plan.num_games {
                bail!(
                    "{} holds {completed} games but the match is only {} long",
                    log_path.display(),
                    plan.num_games
                );
            }
        } else {
            bail!(
                "{} already exists (use --continue to resume or --force to overwrite)",
                match_dir.display()
            );
        }
    }

    fs::create_dir_all(&match_dir)
        .with_context(|| format!("cannot create {}", match_dir.display()))?;
    if !plan.disable_sgf {
        fs::create_dir_all(match_dir.join("SGFs"))?;
    }
    if plan.engine_a.log_stderr || plan.engine_b.log_stderr {
        fs::create_dir_all(match_dir.join("stderr"))?;
    }

    Ok(Session {
        match_dir,
        completed,
    })
}

fn count_lines(path: &Path) -> Result<u32> {
    if !path.exists() {
        return Ok(0);
    }
    let file = fs::File::open(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
