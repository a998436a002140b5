//! End-to-end match flow against a tiny shell pseudo-engine.
#![cfg(unix)]

use crossbeam_channel::{bounded, Receiver, Sender};
use dumbarb::config::MatchPlan;
use dumbarb::runner::{self, MatchStatus};
use dumbarb::session;
use std::fs;
use std::path::{Path, PathBuf};

/// A GTP engine in POSIX sh: answers the handshake, plays `{genmove}` to
/// every genmove and `W+5.5` to final_score.
fn write_engine(dir: &Path, file: &str, genmove: &str) -> PathBuf {
    let script = r#"while read -r line; do
  set -- $line
  case "$1" in
    list_commands) printf '= name\nversion\nboardsize\nkomi\ntime_settings\nkgs-time_settings\ntime_left\nclear_board\nplay\ngenmove\nfinal_score\nquit\n\n' ;;
    name) printf '= mockgtp\n\n' ;;
    version) printf '= 1.0\n\n' ;;
    genmove) printf '= @MOVE@\n\n' ;;
    final_score) printf '= W+5.5\n\n' ;;
    quit) printf '=\n\n'; exit 0 ;;
    *) printf '=\n\n' ;;
  esac
done
"#
    .replace("@MOVE@", genmove);
    let path = dir.join(file);
    fs::write(&path, script).unwrap();
    path
}

fn plan_for(config: &str, name: &str) -> MatchPlan {
    MatchPlan::from_str(config, name).unwrap()
}

/// The sender must stay alive for the duration of the match: dropping it is
/// the cancellation signal.
fn cancel_token() -> (Sender<()>, Receiver<()>) {
    bounded::<()>(0)
}

fn log_lines(dir: &Path, name: &str) -> Vec<String> {
    let text = fs::read_to_string(dir.join(name).join(format!("{name}.log"))).unwrap();
    text.lines().map(str::to_string).collect()
}

#[test]
fn two_passers_play_out_a_match() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = write_engine(tmp.path(), "passer.sh", "pass");
    let config = format!(
        "[DEFAULT]
numGames = 2
boardSize = 9
timeSys = canadian
mainTime = 0
periodTime = 5
periodCount = 1
matchWait = 0
gameWait = 0
[engA]
cmd = sh {e}
[engB]
cmd = sh {e}
",
        e = engine.display()
    );
    let plan = plan_for(&config, "passers");
    let session = session::prepare(tmp.path(), &plan, false, false).unwrap();
    let (_tx, cancel) = cancel_token();

    let status = runner::run(&plan, &session, &cancel).unwrap();
    assert_eq!(status, MatchStatus::Complete);

    let lines = log_lines(tmp.path(), "passers");
    assert_eq!(lines.len(), 2);

    // game 1: A holds black; game 2 colours alternate
    let g1: Vec<&str> = lines[0].split_whitespace().collect();
    assert_eq!(&g1[1..6], &["[#1]", "engA", "B", "engB", "W"]);
    assert_eq!(g1[7], "None"); // passed out, no scorer
    assert_eq!(g1[8], "XX");
    assert_eq!(g1[9], "2");
    assert_eq!(g1[10], "1");
    assert_eq!(g1[11], "1");
    assert_eq!(*g1.last().unwrap(), "None"); // no violations
    let g2: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(&g2[1..6], &["[#2]", "engA", "W", "engB", "B"]);

    let mvtimes =
        fs::read_to_string(tmp.path().join("passers").join("passers.mvtimes")).unwrap();
    let mv_lines: Vec<&str> = mvtimes.lines().collect();
    assert_eq!(mv_lines.len(), 2);
    assert!(mv_lines[0].starts_with("[#1] pass["));
    assert_eq!(mv_lines[0].matches("pass[").count(), 2);

    for seq in 1..=2 {
        let sgf = fs::read_to_string(
            tmp.path()
                .join("passers")
                .join("SGFs")
                .join(format!("passers-{seq}.sgf")),
        )
        .unwrap();
        assert!(sgf.starts_with("(;GM[1]FF[4]"));
        assert!(sgf.contains("SZ[9]"));
        assert!(sgf.ends_with(")\n"));
    }

    let run_trace =
        fs::read_to_string(tmp.path().join("passers").join("passers.run")).unwrap();
    assert!(run_trace.contains("up as mockgtp 1.0"));
}

#[test]
fn resignation_scores_for_the_other_side() {
    let tmp = tempfile::tempdir().unwrap();
    let resigner = write_engine(tmp.path(), "resigner.sh", "resign");
    let passer = write_engine(tmp.path(), "passer.sh", "pass");
    let config = format!(
        "[DEFAULT]
numGames = 2
boardSize = 9
timeSys = none
matchWait = 0
gameWait = 0
[quitter]
cmd = sh {r}
[stayer]
cmd = sh {p}
",
        r = resigner.display(),
        p = passer.display()
    );
    let plan = plan_for(&config, "resigns");
    let session = session::prepare(tmp.path(), &plan, false, false).unwrap();
    let (_tx, cancel) = cancel_token();

    assert_eq!(
        runner::run(&plan, &session, &cancel).unwrap(),
        MatchStatus::Complete
    );

    let lines = log_lines(tmp.path(), "resigns");
    // game 1: quitter is black and resigns at once
    let g1: Vec<&str> = lines[0].split_whitespace().collect();
    assert_eq!(g1[7], "stayer");
    assert_eq!(g1[8], "W+Resign");
    assert_eq!(g1[9], "0");
    assert_eq!(g1[10], "1"); // the resignation itself
    assert_eq!(g1[11], "0");
    // game 2: stayer is black, passes; quitter (white) resigns
    let g2: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(g2[7], "stayer");
    assert_eq!(g2[8], "B+Resign");
    assert_eq!(g2[9], "1");
}

#[test]
fn passed_out_game_goes_to_the_player_scorer() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = write_engine(tmp.path(), "passer.sh", "pass");
    let config = format!(
        "[DEFAULT]
numGames = 1
boardSize = 9
timeSys = none
matchWait = 0
gameWait = 0
scorer = [engB]
[engA]
cmd = sh {e}
[engB]
cmd = sh {e}
",
        e = engine.display()
    );
    let plan = plan_for(&config, "scored");
    let session = session::prepare(tmp.path(), &plan, false, false).unwrap();
    let (_tx, cancel) = cancel_token();

    assert_eq!(
        runner::run(&plan, &session, &cancel).unwrap(),
        MatchStatus::Complete
    );

    let line = log_lines(tmp.path(), "scored").remove(0);
    let g1: Vec<&str> = line.split_whitespace().collect();
    // W+5.5 from the scorer: the win goes to whoever holds white (engB)
    assert_eq!(g1[7], "engB");
    assert_eq!(g1[8], "W+5.5");
}

#[test]
fn continuing_a_complete_match_plays_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = write_engine(tmp.path(), "passer.sh", "pass");
    let config = format!(
        "[DEFAULT]
numGames = 2
boardSize = 9
timeSys = none
matchWait = 0
gameWait = 0
[engA]
cmd = sh {e}
[engB]
cmd = sh {e}
",
        e = engine.display()
    );
    let plan = plan_for(&config, "rerun");
    let session = session::prepare(tmp.path(), &plan, false, false).unwrap();
    let (_tx, cancel) = cancel_token();
    assert_eq!(
        runner::run(&plan, &session, &cancel).unwrap(),
        MatchStatus::Complete
    );
    let before = log_lines(tmp.path(), "rerun");
    assert_eq!(before.len(), 2);

    // point the engines at a nonexistent command: a resumed complete match
    // must succeed without spawning anything
    let broken = plan_for(
        &config.replace("sh ", "/nonexistent/engine "),
        "rerun",
    );
    let resumed = session::prepare(tmp.path(), &broken, true, false).unwrap();
    assert_eq!(resumed.completed, 2);
    assert_eq!(
        runner::run(&broken, &resumed, &cancel).unwrap(),
        MatchStatus::Complete
    );
    assert_eq!(log_lines(tmp.path(), "rerun"), before);
}
