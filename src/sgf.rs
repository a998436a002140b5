use crate::config::MatchPlan;
use crate::game::GameRecord;
use crate::go::Vertex;

/// Render one game as SGF. The whole header sits on the first line so that
/// two records are byte-identical from the second line on whenever the games
/// themselves are identical.
pub fn render(plan: &MatchPlan, record: &GameRecord) -> String {
    let settings = &plan.settings;
    let mut out = format!(
        "(;GM[1]FF[4]CA[UTF-8]AP[dumbarb:{version}]RU[Chinese]SZ[{size}]KM[{komi}]\
         GN[game {seq}]PW[{white}]PB[{black}]DT[{date}]EV[dumbarb {games}-game match]RE[{result}]\n",
        version = env!("CARGO_PKG_VERSION"),
        size = settings.board_size,
        komi = settings.komi,
        seq = record.seq,
        white = record.white,
        black = record.black,
        date = record.started.format("%Y-%m-%d"),
        games = plan.num_games,
        result = record.outcome.sgf_result(),
    );
    for m in &record.moves {
        if m.vertex == Vertex::Resign {
            continue; // resignation is carried by RE, not a move node
        }
        out.push_str(&format!(
            ";{}[{}]\n",
            m.color.letter(),
            m.vertex.sgf(settings.board_size)
        ));
    }
    out.push_str(")\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameOutcome, MoveRecord};
    use crate::go::Color;
    use chrono::Local;
    use std::time::Duration;

    fn plan() -> MatchPlan {
        let text = "\
[DEFAULT]
numGames = 2
boardSize = 19
komi = 7.5
[black-eng]
cmd = b
[white-eng]
cmd = w
";
        MatchPlan::from_str(text, "m").unwrap()
    }

    fn mv(color: Color, coord: &str) -> MoveRecord {
        MoveRecord {
            color,
            vertex: Vertex::parse(coord, 19).unwrap(),
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn renders_header_moves_and_result() {
        let record = GameRecord {
            seq: 1,
            started: Local::now(),
            black: "black-eng".into(),
            white: "white-eng".into(),
            outcome: GameOutcome::Score {
                winner: Color::White,
                margin: "7.5".into(),
            },
            moves: vec![
                mv(Color::Black, "Q16"),
                mv(Color::White, "D4"),
                mv(Color::Black, "pass"),
                mv(Color::White, "pass"),
            ],
            violations: vec![],
        };
        let sgf = render(&plan(), &record);
        let mut lines = sgf.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("(;GM[1]FF[4]"));
        assert!(header.contains("SZ[19]"));
        assert!(header.contains("KM[7.5]"));
        assert!(header.contains("PW[white-eng]"));
        assert!(header.contains("PB[black-eng]"));
        assert!(header.contains("RE[W+7.5]"));
        assert_eq!(
            lines.collect::<Vec<_>>(),
            vec![";B[pd]", ";W[dp]", ";B[]", ";W[]", ")"]
        );
    }

    #[test]
    fn resign_move_is_omitted_from_the_node_list() {
        let record = GameRecord {
            seq: 2,
            started: Local::now(),
            black: "black-eng".into(),
            white: "white-eng".into(),
            outcome: GameOutcome::Resign {
                winner: Color::White,
            },
            moves: vec![
                mv(Color::Black, "D4"),
                mv(Color::White, "Q4"),
                MoveRecord {
                    color: Color::Black,
                    vertex: Vertex::Resign,
                    elapsed: Duration::from_millis(10),
                },
            ],
            violations: vec![],
        };
        let sgf = render(&plan(), &record);
        assert!(sgf.contains("RE[W+Resign]"));
        assert_eq!(sgf.matches(';').count(), 3); // header node + 2 moves
    }

    #[test]
    fn identical_games_differ_only_in_the_first_line() {
        let mk = |seq| GameRecord {
            seq,
            started: Local::now(),
            black: "black-eng".into(),
            white: "white-eng".into(),
            outcome: GameOutcome::Passed,
            moves: vec![mv(Color::Black, "K10"), mv(Color::White, "pass")],
            violations: vec![],
        };
        let a = render(&plan(), &mk(1));
        let b = render(&plan(), &mk(2));
        assert_eq!(
            a.splitn(2, '\n').nth(1).unwrap(),
            b.splitn(2, '\n').nth(1).unwrap()
        );
    }
}
