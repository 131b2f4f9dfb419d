use serde::{Deserialize, Serialize};

use crate::board::{EdgeId, NodeId};
use crate::game::cards::{CardKind, DevelopmentCard};
use crate::types::{Color, StructureKind, UserId};

pub const MAX_ROADS: usize = 15;
pub const MAX_SETTLEMENTS: usize = 5;
pub const MAX_CITIES: usize = 4;

pub const LONGEST_ROAD_BONUS: u8 = 2;
pub const LARGEST_ARMY_BONUS: u8 = 2;

/// Structures a player may place without paying. `roads`, `settlements` and
/// `cities` come from the `freebuild` override and last until used.
/// `card_roads` come from road building and lapse when the turn ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBuilds {
    pub roads: u8,
    pub settlements: u8,
    pub cities: u8,
    pub card_roads: u8,
}

impl FreeBuilds {
    pub fn get(&self, kind: StructureKind) -> u8 {
        match kind {
            StructureKind::Road => self.roads.saturating_add(self.card_roads),
            StructureKind::Settlement => self.settlements,
            StructureKind::City => self.cities,
        }
    }

    fn slot(&mut self, kind: StructureKind) -> &mut u8 {
        match kind {
            StructureKind::Road => &mut self.roads,
            StructureKind::Settlement => &mut self.settlements,
            StructureKind::City => &mut self.cities,
        }
    }

    pub fn grant(&mut self, kind: StructureKind, amount: u8) {
        let slot = self.slot(kind);
        *slot = slot.saturating_add(amount);
    }

    pub fn grant_card_roads(&mut self, amount: u8) {
        self.card_roads = self.card_roads.saturating_add(amount);
    }

    /// Consumes one allowance of `kind`; false if none was left.
    /// Road building allowances are spent before override ones.
    pub fn take(&mut self, kind: StructureKind) -> bool {
        if kind == StructureKind::Road && self.card_roads > 0 {
            self.card_roads -= 1;
            return true;
        }
        let slot = self.slot(kind);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub user: UserId,
    pub seat: usize,
    pub color: Color,
    pub settlements: Vec<NodeId>,
    pub cities: Vec<NodeId>,
    pub roads: Vec<EdgeId>,
    pub cards: Vec<DevelopmentCard>,
    pub knights_played: u8,
    pub free_builds: FreeBuilds,
    pub has_longest_road: bool,
    pub has_largest_army: bool,
    pub played_card_this_turn: bool,
    /// Set when the player's connection leaves; the seat stays in turn order.
    pub departed: bool,
}

impl PlayerState {
    pub fn new(user: UserId, seat: usize, color: Color) -> Self {
        Self {
            user,
            seat,
            color,
            settlements: Vec::new(),
            cities: Vec::new(),
            roads: Vec::new(),
            cards: Vec::new(),
            knights_played: 0,
            free_builds: FreeBuilds::default(),
            has_longest_road: false,
            has_largest_army: false,
            played_card_this_turn: false,
            departed: false,
        }
    }

    pub fn reset_for_new_turn(&mut self) {
        self.played_card_this_turn = false;
        self.free_builds.card_roads = 0;
    }

    pub fn add_card(&mut self, kind: CardKind, turn: u32) {
        self.cards.push(DevelopmentCard::new(kind, turn));
    }

    /// Index of an unplayed card of `kind` that was acquired before `turn`.
    pub fn playable_card(&self, kind: CardKind, turn: u32) -> Option<usize> {
        self.cards
            .iter()
            .position(|card| card.kind == kind && !card.played && card.acquired_turn < turn)
    }

    pub fn mark_played(&mut self, index: usize) {
        if let Some(card) = self.cards.get_mut(index) {
            card.played = true;
            if card.kind == CardKind::Knight {
                self.knights_played += 1;
            }
            self.played_card_this_turn = true;
        }
    }

    pub fn structure_count(&self, kind: StructureKind) -> usize {
        match kind {
            StructureKind::Settlement => self.settlements.len(),
            StructureKind::City => self.cities.len(),
            StructureKind::Road => self.roads.len(),
        }
    }

    pub fn limit_reached(&self, kind: StructureKind) -> bool {
        let limit = match kind {
            StructureKind::Settlement => MAX_SETTLEMENTS,
            StructureKind::City => MAX_CITIES,
            StructureKind::Road => MAX_ROADS,
        };
        self.structure_count(kind) >= limit
    }

    pub fn record_settlement(&mut self, node: NodeId) {
        self.settlements.push(node);
    }

    pub fn record_city(&mut self, node: NodeId) {
        self.settlements.retain(|n| *n != node);
        self.cities.push(node);
    }

    pub fn record_road(&mut self, edge: EdgeId) {
        self.roads.push(edge);
    }

    pub fn total_points(&self) -> u8 {
        let cards: u8 = self.cards.iter().map(DevelopmentCard::victory_points).sum();
        self.building_points() + cards + self.bonus_points()
    }

    /// Points visible to opponents; hidden victory point cards are excluded.
    pub fn public_points(&self) -> u8 {
        let cards: u8 = self
            .cards
            .iter()
            .map(DevelopmentCard::public_victory_points)
            .sum();
        self.building_points() + cards + self.bonus_points()
    }

    fn building_points(&self) -> u8 {
        (self.settlements.len() + self.cities.len() * 2) as u8
    }

    pub fn bonus_points(&self) -> u8 {
        let mut bonus = 0;
        if self.has_longest_road {
            bonus += LONGEST_ROAD_BONUS;
        }
        if self.has_largest_army {
            bonus += LARGEST_ARMY_BONUS;
        }
        bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> PlayerState {
        PlayerState::new(UserId::new(), 0, Color::Red)
    }

    #[test]
    fn test_points_include_hidden_cards_only_in_total() {
        let mut p = player();
        p.record_settlement(1);
        p.record_settlement(9);
        p.record_city(9);
        p.add_card(CardKind::VICTORY_POINT, 0);
        p.has_largest_army = true;

        assert_eq!(p.total_points(), 1 + 2 + 1 + 2);
        assert_eq!(p.public_points(), 1 + 2 + 2);
        assert_eq!(p.settlements, vec![1]);
        assert_eq!(p.cities, vec![9]);
    }

    #[test]
    fn test_card_not_playable_on_acquisition_turn() {
        let mut p = player();
        p.add_card(CardKind::Knight, 3);
        assert_eq!(p.playable_card(CardKind::Knight, 3), None);
        let idx = p.playable_card(CardKind::Knight, 4).unwrap();
        p.mark_played(idx);
        assert_eq!(p.knights_played, 1);
        assert!(p.played_card_this_turn);
        assert_eq!(p.playable_card(CardKind::Knight, 5), None);
    }

    #[test]
    fn test_free_builds() {
        let mut free = FreeBuilds::default();
        assert!(!free.take(StructureKind::Road));
        free.grant(StructureKind::Road, 2);
        assert!(free.take(StructureKind::Road));
        assert_eq!(free.get(StructureKind::Road), 1);
        assert_eq!(free.get(StructureKind::City), 0);
    }

    #[test]
    fn test_card_roads_lapse_at_turn_end() {
        let mut p = player();
        p.free_builds.grant(StructureKind::Road, 1);
        p.free_builds.grant_card_roads(2);
        assert_eq!(p.free_builds.get(StructureKind::Road), 3);
        assert!(p.free_builds.take(StructureKind::Road));
        assert_eq!(p.free_builds.card_roads, 1);
        assert_eq!(p.free_builds.roads, 1);

        p.reset_for_new_turn();
        assert_eq!(p.free_builds.card_roads, 0);
        assert_eq!(p.free_builds.get(StructureKind::Road), 1);
    }

    #[test]
    fn test_structure_limits() {
        let mut p = player();
        for node in 0..MAX_SETTLEMENTS as NodeId {
            assert!(!p.limit_reached(StructureKind::Settlement));
            p.record_settlement(node);
        }
        assert!(p.limit_reached(StructureKind::Settlement));
        assert!(!p.limit_reached(StructureKind::Road));
    }
}
