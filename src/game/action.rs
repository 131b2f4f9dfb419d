use std::fmt;

use serde::{Deserialize, Serialize};

use crate::board::{EdgeId, NodeId, TileId};
use crate::game::cards::{CardKind, ProgressCard};
use crate::game::resources::ResourceBundle;
use crate::types::{ActionType, Resource};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GameAction {
    pub seat: usize,
    pub action_type: ActionType,
    pub payload: ActionPayload,
}

impl GameAction {
    pub fn new(seat: usize, action_type: ActionType) -> Self {
        Self {
            seat,
            action_type,
            payload: ActionPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: ActionPayload) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Display for GameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat {} {}", self.seat, self.action_type)?;
        match &self.payload {
            ActionPayload::None => Ok(()),
            ActionPayload::Node(node) => write!(f, " at node {node}"),
            ActionPayload::Edge(edge) => write!(f, " on edge {edge}"),
            ActionPayload::MaritimeTrade { give, receive, count } => {
                write!(f, " {give} for {count}x{receive}")
            }
            ActionPayload::Trade {
                give,
                receive,
                counterparty,
            } => write!(f, " {give} for {receive} with seat {counterparty}"),
            ActionPayload::Respond(accept) => {
                write!(f, " {}", if *accept { "accept" } else { "decline" })
            }
            ActionPayload::Card(play) => write!(f, " {play:?}"),
            ActionPayload::Robber { tile, victim } => match victim {
                Some(victim) => write!(f, " to tile {tile}, robbing seat {victim}"),
                None => write!(f, " to tile {tile}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ActionPayload {
    #[default]
    None,
    Node(NodeId),
    Edge(EdgeId),
    /// Bank trade at the player's best rate for `give`; `count` units of
    /// `receive` cost `rate * count` of `give`.
    MaritimeTrade {
        give: Resource,
        receive: Resource,
        count: u8,
    },
    Trade {
        give: ResourceBundle,
        receive: ResourceBundle,
        counterparty: usize,
    },
    Respond(bool),
    Card(CardPlay),
    Robber {
        tile: TileId,
        victim: Option<usize>,
    },
}

/// A development card play with the choices it needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardPlay {
    Knight,
    RoadBuilding,
    YearOfPlenty(Resource, Resource),
    Monopoly(Resource),
}

impl CardPlay {
    pub fn kind(&self) -> CardKind {
        match self {
            CardPlay::Knight => CardKind::Knight,
            CardPlay::RoadBuilding => CardKind::Progress(ProgressCard::RoadBuilding),
            CardPlay::YearOfPlenty(..) => CardKind::Progress(ProgressCard::YearOfPlenty),
            CardPlay::Monopoly(_) => CardKind::Progress(ProgressCard::Monopoly),
        }
    }
}
