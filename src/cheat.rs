//! Debug commands typed into chat.
//!
//! A message is a cheat when its first whitespace token is one of the tags in
//! [`VOCABULARY`] and every required argument follows it. Anything else,
//! including a known tag with a missing or unreadable argument, is ordinary
//! chat.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::board::TileId;
use crate::game::cards::CardKind;
use crate::game::state::{GameError, GameState, StepOutcome};
use crate::types::{Resource, StructureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheatTag {
    Roll,
    Grant,
    DevCard,
    FreeBuild,
    EndTurn,
    Burglar,
}

#[derive(Debug)]
pub struct CheatSpec {
    pub tag: CheatTag,
    pub required_args: usize,
    pub usage: &'static str,
}

pub static VOCABULARY: Lazy<HashMap<&'static str, CheatSpec>> = Lazy::new(|| {
    [
        ("roll", CheatTag::Roll, 1, "roll <sum>"),
        ("grant", CheatTag::Grant, 1, "grant <resource> [amount]"),
        ("devcard", CheatTag::DevCard, 1, "devcard <kind>"),
        ("freebuild", CheatTag::FreeBuild, 1, "freebuild <road|settlement|city>"),
        ("endturn", CheatTag::EndTurn, 0, "endturn"),
        ("burglar", CheatTag::Burglar, 1, "burglar <tile>"),
    ]
    .into_iter()
    .map(|(name, tag, required_args, usage)| {
        (
            name,
            CheatSpec {
                tag,
                required_args,
                usage,
            },
        )
    })
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheatCommand {
    Roll(u8),
    Grant { resource: Resource, amount: u8 },
    DevCard(CardKind),
    FreeBuild(StructureKind),
    EndTurn,
    Burglar(TileId),
}

impl fmt::Display for CheatCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheatCommand::Roll(sum) => write!(f, "roll {sum}"),
            CheatCommand::Grant { resource, amount } => write!(f, "grant {resource} {amount}"),
            CheatCommand::DevCard(kind) => write!(f, "devcard {kind:?}"),
            CheatCommand::FreeBuild(kind) => write!(f, "freebuild {kind}"),
            CheatCommand::EndTurn => write!(f, "endturn"),
            CheatCommand::Burglar(tile) => write!(f, "burglar {tile}"),
        }
    }
}

fn recognize(text: &str) -> Option<(&'static CheatSpec, Vec<&str>)> {
    let mut tokens = text.split_whitespace();
    let spec = VOCABULARY.get(tokens.next()?)?;
    let args: Vec<&str> = tokens.collect();
    (args.len() >= spec.required_args).then_some((spec, args))
}

pub fn is_cheat(text: &str) -> bool {
    recognize(text).is_some()
}

pub fn parse(text: &str) -> Option<CheatCommand> {
    let (spec, args) = recognize(text)?;
    let command = match spec.tag {
        CheatTag::Roll => CheatCommand::Roll(args[0].parse().ok()?),
        CheatTag::Grant => CheatCommand::Grant {
            resource: args[0].parse().ok()?,
            amount: match args.get(1) {
                Some(amount) => amount.parse().ok()?,
                None => 1,
            },
        },
        CheatTag::DevCard => CheatCommand::DevCard(args[0].parse().ok()?),
        CheatTag::FreeBuild => CheatCommand::FreeBuild(args[0].parse().ok()?),
        CheatTag::EndTurn => CheatCommand::EndTurn,
        CheatTag::Burglar => CheatCommand::Burglar(args[0].parse().ok()?),
    };
    Some(command)
}

/// Applies an authorized override for `seat`. Turn ownership is not checked;
/// a forced roll still needs the game to be waiting for a roll and counts as
/// the current player's roll.
pub fn execute(
    command: CheatCommand,
    game: &mut GameState,
    seat: usize,
) -> Result<StepOutcome, GameError> {
    match command {
        CheatCommand::Roll(sum) => game.force_roll(sum),
        CheatCommand::Grant { resource, amount } => game.grant_resources(seat, resource, amount),
        CheatCommand::DevCard(kind) => game.grant_card(seat, kind),
        CheatCommand::FreeBuild(kind) => game.grant_free_build(seat, kind),
        CheatCommand::EndTurn => game.force_end_turn(),
        CheatCommand::Burglar(tile) => game.relocate_robber(tile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::ProgressCard;
    use crate::game::state::{GameConfig, TurnPhase};
    use crate::types::UserId;

    fn game() -> GameState {
        let config = GameConfig {
            auto_placement: true,
            ..GameConfig::default()
        };
        GameState::new(config, &[UserId::new(), UserId::new()]).unwrap()
    }

    #[test]
    fn test_is_cheat_requires_arguments() {
        assert!(is_cheat("roll 9"));
        assert!(is_cheat("  roll   9  "));
        assert!(!is_cheat("roll"));
        assert!(!is_cheat("rolling 9"));
        assert!(!is_cheat("ROLL 9"));
        assert!(!is_cheat(""));
        assert!(is_cheat("endturn"));
        assert!(!is_cheat("hello there"));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse("roll 9"), Some(CheatCommand::Roll(9)));
        assert_eq!(parse("roll nine"), None);
        assert_eq!(
            parse("grant wood"),
            Some(CheatCommand::Grant {
                resource: Resource::Wood,
                amount: 1
            })
        );
        assert_eq!(
            parse("grant ore 3"),
            Some(CheatCommand::Grant {
                resource: Resource::Ore,
                amount: 3
            })
        );
        assert_eq!(parse("grant gold"), None);
        assert_eq!(
            parse("devcard monopoly"),
            Some(CheatCommand::DevCard(CardKind::Progress(ProgressCard::Monopoly)))
        );
        assert_eq!(
            parse("freebuild city"),
            Some(CheatCommand::FreeBuild(StructureKind::City))
        );
        assert_eq!(parse("endturn now"), Some(CheatCommand::EndTurn));
        assert_eq!(parse("burglar 4"), Some(CheatCommand::Burglar(4)));
    }

    #[test]
    fn test_every_tag_has_usage() {
        for (name, spec) in VOCABULARY.iter() {
            assert!(spec.usage.starts_with(name));
        }
        assert_eq!(VOCABULARY.len(), 6);
    }

    #[test]
    fn test_forced_roll_ignores_turn_ownership() {
        let mut game = game();
        execute(CheatCommand::Roll(9), &mut game, 1).unwrap();
        let roll = game.last_roll().unwrap();
        assert_eq!(roll.dice, (6, 3));
        assert!(roll.forced);
        assert_eq!(game.current_seat(), 0);
        assert_eq!(game.phase(), &TurnPhase::ActionPhase);
    }

    #[test]
    fn test_forced_roll_needs_awaiting_roll() {
        let mut game = game();
        execute(CheatCommand::Roll(8), &mut game, 0).unwrap();
        assert!(matches!(
            execute(CheatCommand::Roll(8), &mut game, 0),
            Err(GameError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_grant_and_burglar() {
        let mut game = game();
        let before = game.ledger().holdings(1).unwrap().get(Resource::Brick);
        execute(
            CheatCommand::Grant {
                resource: Resource::Brick,
                amount: 2,
            },
            &mut game,
            1,
        )
        .unwrap();
        assert_eq!(game.ledger().holdings(1).unwrap().get(Resource::Brick), before + 2);

        execute(CheatCommand::Burglar(3), &mut game, 1).unwrap();
        assert_eq!(game.robber_tile(), Some(3));
        assert!(execute(CheatCommand::Burglar(400), &mut game, 1).is_err());
    }

    #[test]
    fn test_endturn_advances() {
        let mut game = game();
        execute(CheatCommand::EndTurn, &mut game, 1).unwrap();
        assert_eq!(game.current_seat(), 1);
    }
}
