use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::board::{Board, TileId};
use crate::game::ledger::ProductionPlan;

/// The sum that produces nothing and sends the robber moving instead.
pub const ROBBER_ROLL: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceOutcome {
    pub dice: (u8, u8),
    pub forced: bool,
}

impl DiceOutcome {
    pub fn sum(&self) -> u8 {
        self.dice.0 + self.dice.1
    }

    pub fn triggers_robber(&self) -> bool {
        self.sum() == ROBBER_ROLL
    }
}

#[derive(Debug, Clone)]
pub struct DiceResolver {
    rng: StdRng,
}

impl DiceResolver {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn roll(&mut self) -> DiceOutcome {
        DiceOutcome {
            dice: (self.rng.gen_range(1..=6), self.rng.gen_range(1..=6)),
            forced: false,
        }
    }

    /// Debug override. Sums of 7 and up put a 6 on the first die, lower sums a
    /// 1; the second die takes the remainder clamped to 1..=6, so sums outside
    /// 2..=12 are not rejected but land on (1,1) or (6,6).
    pub fn force_roll(sum: u8) -> DiceOutcome {
        let first = if sum >= ROBBER_ROLL { 6 } else { 1 };
        let second = sum.saturating_sub(first).clamp(1, 6);
        DiceOutcome {
            dice: (first, second),
            forced: true,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// One credit per settlement and two per city on every tile showing the
    /// rolled number, skipping the tile under the robber. Empty for a 7.
    pub fn resolve_production(
        outcome: &DiceOutcome,
        board: &Board,
        robber_tile: Option<TileId>,
    ) -> ProductionPlan {
        let mut plan = ProductionPlan::new();
        if outcome.triggers_robber() {
            return plan;
        }
        let sum = outcome.sum();
        for tile in &board.tiles {
            if tile.number != Some(sum) || Some(tile.id) == robber_tile {
                continue;
            }
            let Some(resource) = tile.resource else {
                continue;
            };
            for node in &tile.nodes {
                if let Some(structure) = board.graph.structure_at(*node) {
                    plan.push(structure.owner(), resource, structure.production_multiplier());
                }
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MapType;

    #[test]
    fn test_force_roll_examples() {
        assert_eq!(DiceResolver::force_roll(9).dice, (6, 3));
        assert_eq!(DiceResolver::force_roll(13).dice, (6, 6));
        assert_eq!(DiceResolver::force_roll(7).dice, (6, 1));
        assert_eq!(DiceResolver::force_roll(6).dice, (1, 5));
        assert_eq!(DiceResolver::force_roll(2).dice, (1, 1));
        assert_eq!(DiceResolver::force_roll(0).dice, (1, 1));
        assert_eq!(DiceResolver::force_roll(255).dice, (6, 6));
        assert!(DiceResolver::force_roll(9).forced);
    }

    #[test]
    fn test_force_roll_is_exact_inside_range() {
        for sum in 2..=12 {
            assert_eq!(DiceResolver::force_roll(sum).sum(), sum);
        }
    }

    #[test]
    fn test_roll_stays_in_range_and_is_seeded() {
        let mut a = DiceResolver::new(17);
        let mut b = DiceResolver::new(17);
        for _ in 0..500 {
            let outcome = a.roll();
            assert_eq!(outcome, b.roll());
            assert!((1..=6).contains(&outcome.dice.0));
            assert!((1..=6).contains(&outcome.dice.1));
            assert!(!outcome.forced);
        }
    }

    fn board_with_structures() -> (Board, TileId) {
        let mut rng = StdRng::seed_from_u64(4);
        let mut board = Board::generate(MapType::Base, &mut rng).unwrap();
        let tile = board.tiles.iter().find(|t| t.number == Some(8)).unwrap().clone();
        board.graph.place_settlement(tile.nodes[0], 0, false).unwrap();
        board.graph.place_settlement(tile.nodes[3], 1, false).unwrap();
        board.graph.upgrade_to_city(tile.nodes[3], 1).unwrap();
        (board, tile.id)
    }

    #[test]
    fn test_production_counts_cities_double() {
        let (board, tile_id) = board_with_structures();
        let resource = board.tile(tile_id).unwrap().resource.unwrap();
        let outcome = DiceResolver::force_roll(8);
        let plan = DiceResolver::resolve_production(&outcome, &board, None);

        let from_tile: Vec<_> = plan
            .credits()
            .iter()
            .filter(|c| c.resource == resource)
            .map(|c| (c.seat, c.amount))
            .collect();
        assert!(from_tile.contains(&(0, 1)));
        assert!(from_tile.contains(&(1, 2)));
    }

    #[test]
    fn test_robber_blocks_tile() {
        let (board, tile_id) = board_with_structures();
        let outcome = DiceResolver::force_roll(8);
        let blocked = DiceResolver::resolve_production(&outcome, &board, Some(tile_id));
        let open = DiceResolver::resolve_production(&outcome, &board, None);
        assert!(blocked.credits().len() < open.credits().len());
    }

    #[test]
    fn test_seven_produces_nothing() {
        let (board, _) = board_with_structures();
        let plan = DiceResolver::resolve_production(&DiceResolver::force_roll(7), &board, None);
        assert!(plan.is_empty());
    }
}
