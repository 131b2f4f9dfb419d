use serde::{Deserialize, Serialize};

use crate::board::TileId;
use crate::game::action::CardPlay;
use crate::game::dice::DiceOutcome;
use crate::game::resources::ResourceBundle;
use crate::types::{Resource, SessionId, StructureKind, UserId};

/// Where a build request points: a node for settlements and cities, an edge
/// for roads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildTarget {
    Node(u16),
    Edge(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub session: SessionId,
    pub player: UserId,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(session: SessionId, player: UserId, kind: RequestKind) -> Self {
        Self {
            session,
            player,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Roll,
    Build {
        target: BuildTarget,
        structure: StructureKind,
    },
    /// Without a counterparty the trade goes to the bank: `offer` must hold a
    /// single resource and `want` a single resource.
    Trade {
        offer: ResourceBundle,
        want: ResourceBundle,
        counterparty: Option<UserId>,
    },
    RespondTrade {
        accept: bool,
    },
    BuyCard,
    PlayCard {
        play: CardPlay,
    },
    MoveRobber {
        tile: TileId,
        victim: Option<UserId>,
    },
    EndTurn,
    ChatInput {
        text: String,
        timestamp: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DiceResolved {
        player: UserId,
        outcome: DiceOutcome,
    },
    Production {
        deltas: Vec<(UserId, ResourceBundle)>,
        withheld: Vec<Resource>,
    },
    ActionApplied {
        player: Option<UserId>,
        summary: String,
    },
    TurnAdvanced {
        current: UserId,
        seat: usize,
    },
    ActionRejected {
        player: UserId,
        reason: String,
    },
    GameOver {
        winner: UserId,
    },
    ChatRelayed {
        player: UserId,
        text: String,
        timestamp: u64,
    },
    PlayerLeft {
        player: UserId,
    },
}

/// An event stamped with its session and its position in that session's
/// outbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub session: SessionId,
    pub sequence: u64,
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let request = Request::new(
            SessionId::new(),
            UserId::new(),
            RequestKind::Build {
                target: BuildTarget::Node(12),
                structure: StructureKind::Settlement,
            },
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"]["Build"]["target"]["Node"], 12);
        assert_eq!(json["kind"]["Build"]["structure"], "Settlement");
        let back: Request = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_notification_carries_sequence() {
        let note = Notification {
            session: SessionId::new(),
            sequence: 7,
            event: Event::PlayerLeft {
                player: UserId::new(),
            },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"sequence\":7"));
        assert!(json.contains("PlayerLeft"));
    }
}
