use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressCard {
    RoadBuilding,
    YearOfPlenty,
    Monopoly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardKind {
    Knight,
    Progress(ProgressCard),
    VictoryPoint { points: u8, hidden: bool },
}

impl CardKind {
    pub const VICTORY_POINT: CardKind = CardKind::VictoryPoint {
        points: 1,
        hidden: true,
    };
}

impl FromStr for CardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "knight" => Ok(CardKind::Knight),
            "victorypoint" | "vp" => Ok(CardKind::VICTORY_POINT),
            "roadbuilding" => Ok(CardKind::Progress(ProgressCard::RoadBuilding)),
            "yearofplenty" => Ok(CardKind::Progress(ProgressCard::YearOfPlenty)),
            "monopoly" => Ok(CardKind::Progress(ProgressCard::Monopoly)),
            _ => Err(format!("unknown card kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentCard {
    pub kind: CardKind,
    pub played: bool,
    /// Turn the card was acquired on; cards cannot be played on that turn.
    pub acquired_turn: u32,
}

impl DevelopmentCard {
    pub fn new(kind: CardKind, acquired_turn: u32) -> Self {
        Self {
            kind,
            played: false,
            acquired_turn,
        }
    }

    pub fn victory_points(&self) -> u8 {
        match self.kind {
            CardKind::VictoryPoint { points, .. } => points,
            _ => 0,
        }
    }

    pub fn public_victory_points(&self) -> u8 {
        match self.kind {
            CardKind::VictoryPoint {
                points,
                hidden: false,
            } => points,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DevelopmentDeck {
    cards: Vec<CardKind>,
}

impl DevelopmentDeck {
    pub fn standard(rng: &mut impl rand::Rng) -> Self {
        const DISTRIBUTION: &[(CardKind, usize)] = &[
            (CardKind::Knight, 14),
            (CardKind::VICTORY_POINT, 5),
            (CardKind::Progress(ProgressCard::RoadBuilding), 2),
            (CardKind::Progress(ProgressCard::YearOfPlenty), 2),
            (CardKind::Progress(ProgressCard::Monopoly), 2),
        ];

        let mut cards = Vec::with_capacity(25);
        for (card, count) in DISTRIBUTION {
            cards.extend(std::iter::repeat(*card).take(*count));
        }
        cards.shuffle(rng);
        Self { cards }
    }

    pub fn draw(&mut self) -> Option<CardKind> {
        self.cards.pop()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_standard_deck_composition() {
        let mut deck = DevelopmentDeck::standard(&mut StdRng::seed_from_u64(0));
        assert_eq!(deck.len(), 25);
        let mut knights = 0;
        let mut points = 0;
        while let Some(card) = deck.draw() {
            match card {
                CardKind::Knight => knights += 1,
                CardKind::VictoryPoint { points: p, .. } => points += p,
                CardKind::Progress(_) => {}
            }
        }
        assert_eq!(knights, 14);
        assert_eq!(points, 5);
        assert!(deck.is_empty());
    }

    #[test]
    fn test_parse_card_kind() {
        assert_eq!("knight".parse::<CardKind>(), Ok(CardKind::Knight));
        assert_eq!(
            "monopoly".parse::<CardKind>(),
            Ok(CardKind::Progress(ProgressCard::Monopoly))
        );
        assert_eq!(
            "road_building".parse::<CardKind>(),
            Ok(CardKind::Progress(ProgressCard::RoadBuilding))
        );
        assert_eq!("vp".parse::<CardKind>(), Ok(CardKind::VICTORY_POINT));
        assert!("dragon".parse::<CardKind>().is_err());
    }

    #[test]
    fn test_hidden_points_are_not_public() {
        let card = DevelopmentCard::new(CardKind::VICTORY_POINT, 0);
        assert_eq!(card.victory_points(), 1);
        assert_eq!(card.public_victory_points(), 0);
    }
}
