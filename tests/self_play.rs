//! Randomized games played straight against the rules.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use ludo::game::movement::MoveOutcome;
use ludo::game::state::{GameRoom, ParticipantKind, Tier};
use ludo::game::turn::{MoveChoice, RollOutcome};
use ludo::game::FINISH_LINE;

const TURN_LIMIT: usize = 50_000;

fn bot_room() -> GameRoom {
    GameRoom::new(
        Uuid::new_v4(),
        Tier::Bronze,
        std::array::from_fn(|i| ParticipantKind::bot(i + 1)),
    )
}

/// Play to the end, picking uniformly among legal pieces.
fn play(seed: u64) -> GameRoom {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut room = bot_room();

    for _ in 0..TURN_LIMIT {
        if room.is_finished() {
            return room;
        }

        let seat = room.begin_turn().unwrap();
        let dice = rng.gen_range(1..=6);

        match room.resolve_roll(dice).unwrap() {
            RollOutcome::Pass { next, .. } => assert_eq!(next, seat.next()),
            RollOutcome::MustMove { .. } => {
                let legal: Vec<String> = room.participant(seat).pieces.iter()
                    .map(|p| p.name().to_string())
                    .filter(|name| room.check_choice(name).is_ok())
                    .collect();
                let pick = legal.choose(&mut rng).cloned().unwrap();

                let resolution = room.resolve_move(MoveChoice::Piece(pick.clone())).unwrap();
                let outcome: MoveOutcome = resolution.outcome.unwrap();
                assert_eq!(outcome.piece, pick);

                if resolution.winner.is_none() {
                    let keeps = dice == 6 && !outcome.captured();
                    let expected = if keeps { seat } else { seat.next() };
                    assert_eq!(resolution.next, expected);
                }
            }
        }

        for participant in room.participants() {
            for piece in &participant.pieces {
                assert_eq!(piece.position().is_some(), piece.is_unlocked());
                assert!(piece.position().map_or(true, |p| p <= FINISH_LINE));
            }
        }
        room.take_events();
    }

    panic!("seed {seed} did not finish within {TURN_LIMIT} turns");
}

#[test]
fn random_games_finish_with_one_winner() {
    for seed in 0..20 {
        let mut room = play(seed);
        let winner = room.winner().unwrap();

        let finished: Vec<_> = room.participants().iter()
            .filter(|p| p.has_finished())
            .map(|p| p.color)
            .collect();
        assert_eq!(finished, vec![winner], "seed {seed}");
        assert!(room.begin_turn().is_err());
    }
}
