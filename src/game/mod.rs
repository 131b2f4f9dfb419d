pub mod action;
pub mod cards;
pub mod dice;
pub mod ledger;
pub mod players;
pub mod resources;
pub mod state;

pub use action::{ActionPayload, CardPlay, GameAction};
pub use cards::{CardKind, DevelopmentCard, DevelopmentDeck, ProgressCard};
pub use dice::{DiceOutcome, DiceResolver};
pub use ledger::{Ledger, LedgerError, ProductionPlan, ProductionReport};
pub use players::{FreeBuilds, PlayerState};
pub use resources::{
    COST_CITY, COST_DEVELOPMENT, COST_ROAD, COST_SETTLEMENT, ResourceBundle, ResourceError,
};
pub use state::{
    GameConfig, GameError, GameEvent, GameSnapshot, GameState, PlayerSnapshot, StepOutcome,
    TradeOffer, TurnPhase,
};
