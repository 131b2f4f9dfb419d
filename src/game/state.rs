use std::fmt;

use itertools::Itertools;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::board::{
    Board, BoardError, EdgeId, Harbor, LandTile, MapType, NodeId, PlacementViolation, TileId,
};
use crate::game::action::{ActionPayload, CardPlay, GameAction};
use crate::game::cards::{CardKind, DevelopmentDeck};
use crate::game::dice::{DiceOutcome, DiceResolver};
use crate::game::ledger::{Ledger, LedgerError, ProductionReport};
use crate::game::players::PlayerState;
use crate::game::resources::{COST_DEVELOPMENT, ResourceBundle, build_cost};
use crate::types::{ActionType, Color, Resource, StructureKind, UserId};

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
/// Fewest roads that can hold the longest road bonus.
pub const MIN_LONGEST_ROAD: usize = 5;
/// Fewest knights that can hold the largest army bonus.
pub const MIN_LARGEST_ARMY: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub map_type: MapType,
    pub vps_to_win: u8,
    pub seed: u64,
    /// Players holding more cards than this discard half on a 7.
    pub discard_limit: u32,
    /// Place every seat's opening settlements and roads at random legal sites
    /// instead of waiting for setup actions.
    pub auto_placement: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            map_type: MapType::Base,
            vps_to_win: 10,
            seed: 42,
            discard_limit: 7,
            auto_placement: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupPrompt {
    Settlement,
    Road,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SetupStep {
    seat: usize,
    prompt: SetupPrompt,
    second_round: bool,
}

/// Snake-order opening placement: every seat places a settlement and a road,
/// first in seat order, then in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupState {
    steps: Vec<SetupStep>,
    cursor: usize,
    last_settlement: Option<NodeId>,
}

impl SetupState {
    fn new(num_players: usize) -> Self {
        let mut steps = Vec::with_capacity(num_players * 4);
        let forward = (0..num_players).map(|seat| (seat, false));
        let reverse = (0..num_players).rev().map(|seat| (seat, true));
        for (seat, second_round) in forward.chain(reverse) {
            for prompt in [SetupPrompt::Settlement, SetupPrompt::Road] {
                steps.push(SetupStep {
                    seat,
                    prompt,
                    second_round,
                });
            }
        }
        Self {
            steps,
            cursor: 0,
            last_settlement: None,
        }
    }

    pub fn current_seat(&self) -> Option<usize> {
        self.steps.get(self.cursor).map(|step| step.seat)
    }

    pub fn current_prompt(&self) -> Option<SetupPrompt> {
        self.steps.get(self.cursor).map(|step| step.prompt)
    }

    fn is_second_round(&self) -> bool {
        self.steps
            .get(self.cursor)
            .is_some_and(|step| step.second_round)
    }

    fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    Setup(SetupState),
    AwaitingRoll,
    ProductionResolved,
    MovingRobber,
    ActionPhase,
    TurnEnded,
    GameOver { winner: usize },
}

impl TurnPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TurnPhase::Setup(_) => "setup",
            TurnPhase::AwaitingRoll => "awaiting roll",
            TurnPhase::ProductionResolved => "production resolved",
            TurnPhase::MovingRobber => "moving robber",
            TurnPhase::ActionPhase => "action phase",
            TurnPhase::TurnEnded => "turn ended",
            TurnPhase::GameOver { .. } => "game over",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub from: usize,
    pub to: usize,
    pub give: ResourceBundle,
    pub receive: ResourceBundle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    DiceRolled {
        seat: usize,
        outcome: DiceOutcome,
    },
    Produced(ProductionReport),
    Discarded {
        seat: usize,
        bundle: ResourceBundle,
    },
    RobberMoved {
        seat: usize,
        tile: TileId,
        victim: Option<usize>,
        stolen: bool,
    },
    Built {
        seat: usize,
        kind: StructureKind,
        location: u16,
    },
    CardBought {
        seat: usize,
    },
    CardPlayed {
        seat: usize,
        play: CardPlay,
    },
    CardGranted {
        seat: usize,
        kind: CardKind,
    },
    ResourcesGranted {
        seat: usize,
        bundle: ResourceBundle,
    },
    FreeBuildGranted {
        seat: usize,
        kind: StructureKind,
    },
    MaritimeTraded {
        seat: usize,
        gave: ResourceBundle,
        received: ResourceBundle,
    },
    TradeOffered(TradeOffer),
    TradeResolved {
        offer: TradeOffer,
        accepted: bool,
    },
    LongestRoadChanged {
        holder: Option<usize>,
    },
    LargestArmyChanged {
        holder: Option<usize>,
    },
    TurnAdvanced {
        seat: usize,
    },
    GameWon {
        winner: usize,
    },
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEvent::DiceRolled { seat, outcome } => write!(
                f,
                "seat {seat} rolled {} ({}+{})",
                outcome.sum(),
                outcome.dice.0,
                outcome.dice.1
            ),
            GameEvent::Produced(report) => write!(
                f,
                "production for {} seats, {} types withheld",
                report.deltas.len(),
                report.withheld.len()
            ),
            GameEvent::Discarded { seat, bundle } => write!(f, "seat {seat} discarded {bundle}"),
            GameEvent::RobberMoved {
                seat,
                tile,
                victim,
                stolen,
            } => match victim {
                Some(victim) if *stolen => write!(
                    f,
                    "seat {seat} moved the robber to tile {tile} and robbed seat {victim}"
                ),
                _ => write!(f, "seat {seat} moved the robber to tile {tile}"),
            },
            GameEvent::Built {
                seat,
                kind,
                location,
            } => write!(f, "seat {seat} built {kind} at {location}"),
            GameEvent::CardBought { seat } => write!(f, "seat {seat} bought a development card"),
            GameEvent::CardPlayed { seat, play } => write!(f, "seat {seat} played {play:?}"),
            GameEvent::CardGranted { seat, kind } => write!(f, "seat {seat} was granted {kind:?}"),
            GameEvent::ResourcesGranted { seat, bundle } => {
                write!(f, "seat {seat} was granted {bundle}")
            }
            GameEvent::FreeBuildGranted { seat, kind } => {
                write!(f, "seat {seat} may build a {kind} for free")
            }
            GameEvent::MaritimeTraded {
                seat,
                gave,
                received,
            } => write!(f, "seat {seat} traded {gave} to the bank for {received}"),
            GameEvent::TradeOffered(offer) => write!(
                f,
                "seat {} offers {} to seat {} for {}",
                offer.from, offer.give, offer.to, offer.receive
            ),
            GameEvent::TradeResolved { offer, accepted } => write!(
                f,
                "seat {} {} the offer from seat {}",
                offer.to,
                if *accepted { "accepted" } else { "declined" },
                offer.from
            ),
            GameEvent::LongestRoadChanged { holder } => match holder {
                Some(seat) => write!(f, "seat {seat} holds the longest road"),
                None => write!(f, "nobody holds the longest road"),
            },
            GameEvent::LargestArmyChanged { holder } => match holder {
                Some(seat) => write!(f, "seat {seat} holds the largest army"),
                None => write!(f, "nobody holds the largest army"),
            },
            GameEvent::TurnAdvanced { seat } => write!(f, "turn passes to seat {seat}"),
            GameEvent::GameWon { winner } => write!(f, "seat {winner} wins"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub events: Vec<GameEvent>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("game already completed")]
    GameFinished,
    #[error("a game needs {MIN_PLAYERS} to {MAX_PLAYERS} players, got {0}")]
    PlayerCount(usize),
    #[error("invalid seat {0}")]
    InvalidSeat(usize),
    #[error("seat {actual} acted but it is seat {expected}'s turn")]
    NotYourTurn { expected: usize, actual: usize },
    #[error("{action} is not allowed during {phase}")]
    WrongPhase {
        phase: &'static str,
        action: ActionType,
    },
    #[error("missing or invalid payload: {0}")]
    InvalidPayload(&'static str),
    #[error("{0} limit reached")]
    StructureLimit(StructureKind),
    #[error("development deck is empty")]
    DeckEmpty,
    #[error("no playable {0:?} card")]
    CardNotPlayable(CardKind),
    #[error("a development card was already played this turn")]
    CardAlreadyPlayed,
    #[error("a trade offer is already pending")]
    TradePending,
    #[error("no trade offer is pending for seat {0}")]
    NoPendingTrade(usize),
    #[error("invalid trade: {0}")]
    InvalidTrade(&'static str),
    #[error("the robber must move to a different land tile")]
    RobberMustMove,
    #[error("unknown tile {0}")]
    UnknownTile(TileId),
    #[error("seat {0} has nothing on that tile to rob")]
    InvalidVictim(usize),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl GameError {
    /// Invariant violations mean the state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GameError::Ledger(LedgerError::InvariantViolation(_)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user: UserId,
    pub seat: usize,
    pub color: Color,
    pub resources: ResourceBundle,
    pub public_points: u8,
    pub development_cards: usize,
    pub knights_played: u8,
    pub settlements: Vec<NodeId>,
    pub cities: Vec<NodeId>,
    pub roads: Vec<EdgeId>,
    pub has_longest_road: bool,
    pub has_largest_army: bool,
    pub departed: bool,
}

/// Read-only view of a committed game state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub phase: TurnPhase,
    pub current_seat: usize,
    pub turn: u32,
    pub robber_tile: Option<TileId>,
    pub last_roll: Option<DiceOutcome>,
    pub bank: ResourceBundle,
    pub deck_remaining: usize,
    pub pending_trade: Option<TradeOffer>,
    pub players: Vec<PlayerSnapshot>,
    pub tiles: Vec<LandTile>,
}

#[derive(Debug, Clone)]
pub struct GameState {
    config: GameConfig,
    board: Board,
    pub(crate) ledger: Ledger,
    players: Vec<PlayerState>,
    phase: TurnPhase,
    current_seat: usize,
    turn: u32,
    robber_tile: Option<TileId>,
    last_roll: Option<DiceOutcome>,
    rolled_this_turn: bool,
    pending_trade: Option<TradeOffer>,
    deck: DevelopmentDeck,
    dice: DiceResolver,
    legal_actions: Vec<GameAction>,
}

impl GameState {
    pub fn new(config: GameConfig, roster: &[UserId]) -> Result<Self, GameError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&roster.len()) {
            return Err(GameError::PlayerCount(roster.len()));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let board = Board::generate(config.map_type, &mut rng)?;
        let deck = DevelopmentDeck::standard(&mut rng);
        let dice = DiceResolver::new(rng.r#gen());
        let players = roster
            .iter()
            .enumerate()
            .map(|(seat, user)| PlayerState::new(*user, seat, Color::ORDERED[seat]))
            .collect();

        let mut state = Self {
            robber_tile: board.desert(),
            board,
            ledger: Ledger::new(roster.len()),
            players,
            phase: TurnPhase::Setup(SetupState::new(roster.len())),
            current_seat: 0,
            turn: 0,
            last_roll: None,
            rolled_this_turn: false,
            pending_trade: None,
            deck,
            dice,
            legal_actions: Vec::new(),
            config,
        };
        state.refresh_legal_actions();

        if state.config.auto_placement {
            state.auto_place()?;
        }
        Ok(state)
    }

    fn auto_place(&mut self) -> Result<(), GameError> {
        while matches!(self.phase, TurnPhase::Setup(_)) {
            if self.legal_actions.is_empty() {
                return Err(GameError::Board(PlacementViolation::NotConnected.into()));
            }
            let idx = self.dice.rng().gen_range(0..self.legal_actions.len());
            let action = self.legal_actions[idx].clone();
            self.step(action)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.phase
    }

    pub fn current_seat(&self) -> usize {
        self.current_seat
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn robber_tile(&self) -> Option<TileId> {
        self.robber_tile
    }

    pub fn last_roll(&self) -> Option<DiceOutcome> {
        self.last_roll
    }

    pub fn pending_trade(&self) -> Option<&TradeOffer> {
        self.pending_trade.as_ref()
    }

    pub fn is_over(&self) -> bool {
        matches!(self.phase, TurnPhase::GameOver { .. })
    }

    pub fn winner(&self) -> Option<usize> {
        match self.phase {
            TurnPhase::GameOver { winner } => Some(winner),
            _ => None,
        }
    }

    pub fn seat_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|p| p.user == user)
    }

    /// Every action that would currently succeed, including trade responses
    /// from a seat other than the current one.
    pub fn legal_actions(&self) -> &[GameAction] {
        &self.legal_actions
    }

    pub fn step(&mut self, action: GameAction) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| state.apply(action, events))
    }

    /// Ends the current turn regardless of what the player still had pending.
    pub fn force_end_turn(&mut self) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| match state.phase {
            TurnPhase::AwaitingRoll | TurnPhase::MovingRobber | TurnPhase::ActionPhase => {
                state.end_turn(events);
                Ok(())
            }
            _ => Err(state.wrong_phase(ActionType::EndTurn)),
        })
    }

    /// Rolls `sum` for the current seat, whoever asked for it.
    pub fn force_roll(&mut self, sum: u8) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| {
            if state.phase != TurnPhase::AwaitingRoll {
                return Err(state.wrong_phase(ActionType::Roll));
            }
            let seat = state.current_seat;
            state.resolve_roll(seat, DiceResolver::force_roll(sum), events)
        })
    }

    pub fn grant_resources(
        &mut self,
        seat: usize,
        resource: Resource,
        amount: u8,
    ) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| {
            state.ensure_seat(seat)?;
            state.ledger.credit(seat, resource, amount)?;
            events.push(GameEvent::ResourcesGranted {
                seat,
                bundle: ResourceBundle::single(resource, amount),
            });
            Ok(())
        })
    }

    /// Hands out a card from outside the deck, playable from this turn on.
    pub fn grant_card(&mut self, seat: usize, kind: CardKind) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| {
            state.ensure_seat(seat)?;
            let acquired = state.turn.saturating_sub(1);
            state.players[seat].add_card(kind, acquired);
            events.push(GameEvent::CardGranted { seat, kind });
            Ok(())
        })
    }

    pub fn grant_free_build(
        &mut self,
        seat: usize,
        kind: StructureKind,
    ) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| {
            state.ensure_seat(seat)?;
            state.players[seat].free_builds.grant(kind, 1);
            events.push(GameEvent::FreeBuildGranted { seat, kind });
            Ok(())
        })
    }

    /// Moves the robber without stealing.
    pub fn relocate_robber(&mut self, tile: TileId) -> Result<StepOutcome, GameError> {
        self.staged(|state, events| {
            state.board.tile(tile).ok_or(GameError::UnknownTile(tile))?;
            state.robber_tile = Some(tile);
            events.push(GameEvent::RobberMoved {
                seat: state.current_seat,
                tile,
                victim: None,
                stolen: false,
            });
            Ok(())
        })
    }

    /// Marks a seat as departed; it keeps its place in turn order.
    pub fn mark_departed(&mut self, seat: usize) -> Result<(), GameError> {
        self.ensure_seat(seat)?;
        self.players[seat].departed = true;
        Ok(())
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            phase: self.phase.clone(),
            current_seat: self.current_seat,
            turn: self.turn,
            robber_tile: self.robber_tile,
            last_roll: self.last_roll,
            bank: *self.ledger.bank(),
            deck_remaining: self.deck.len(),
            pending_trade: self.pending_trade,
            players: self
                .players
                .iter()
                .map(|p| PlayerSnapshot {
                    user: p.user,
                    seat: p.seat,
                    color: p.color,
                    resources: self.ledger.holdings(p.seat).copied().unwrap_or_default(),
                    public_points: p.public_points(),
                    development_cards: p.cards.iter().filter(|c| !c.played).count(),
                    knights_played: p.knights_played,
                    settlements: p.settlements.clone(),
                    cities: p.cities.clone(),
                    roads: p.roads.clone(),
                    has_longest_road: p.has_longest_road,
                    has_largest_army: p.has_largest_army,
                    departed: p.departed,
                })
                .collect(),
            tiles: self.board.tiles.clone(),
        }
    }

    /// Runs `f` against a copy of the state and commits only if it succeeds,
    /// so a rejected action never leaves a partial mutation behind.
    fn staged<F>(&mut self, f: F) -> Result<StepOutcome, GameError>
    where
        F: FnOnce(&mut GameState, &mut Vec<GameEvent>) -> Result<(), GameError>,
    {
        if self.is_over() {
            return Err(GameError::GameFinished);
        }
        self.ledger.audit()?;

        let mut staged = self.clone();
        let mut events = Vec::new();
        f(&mut staged, &mut events)?;
        staged.finish_step(&mut events)?;

        let done = staged.is_over();
        *self = staged;
        Ok(StepOutcome { events, done })
    }

    fn finish_step(&mut self, events: &mut Vec<GameEvent>) -> Result<(), GameError> {
        self.ledger.audit()?;
        self.withdraw_uncovered_offer(events);
        if !matches!(self.phase, TurnPhase::Setup(_)) {
            self.update_longest_road(events);
            self.update_largest_army(events);
            self.check_victory(events);
        }
        self.refresh_legal_actions();
        Ok(())
    }

    /// Declines a pending offer once the offerer no longer holds what it gives.
    fn withdraw_uncovered_offer(&mut self, events: &mut Vec<GameEvent>) {
        let Some(offer) = self.pending_trade else {
            return;
        };
        if !self.offer_covered(&offer) {
            self.pending_trade = None;
            events.push(GameEvent::TradeResolved {
                offer,
                accepted: false,
            });
        }
    }

    fn offer_covered(&self, offer: &TradeOffer) -> bool {
        self.ledger
            .holdings(offer.from)
            .is_ok_and(|h| h.can_afford(&offer.give))
    }

    fn apply(&mut self, action: GameAction, events: &mut Vec<GameEvent>) -> Result<(), GameError> {
        self.ensure_seat(action.seat)?;
        if action.action_type == ActionType::RespondTrade {
            return self.respond_trade(&action, events);
        }
        if action.seat != self.current_seat {
            return Err(GameError::NotYourTurn {
                expected: self.current_seat,
                actual: action.seat,
            });
        }

        match self.phase {
            TurnPhase::Setup(_) => self.handle_setup_action(&action, events),
            TurnPhase::AwaitingRoll => match action.action_type {
                ActionType::Roll => {
                    let outcome = self.dice.roll();
                    self.resolve_roll(action.seat, outcome, events)
                }
                ActionType::PlayDevelopmentCard => self.play_card(&action, events),
                other => Err(self.wrong_phase(other)),
            },
            TurnPhase::MovingRobber => match action.action_type {
                ActionType::MoveRobber => self.move_robber(&action, events),
                other => Err(self.wrong_phase(other)),
            },
            TurnPhase::ActionPhase => self.handle_turn_action(&action, events),
            _ => Err(self.wrong_phase(action.action_type)),
        }
    }

    fn handle_setup_action(
        &mut self,
        action: &GameAction,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let TurnPhase::Setup(setup) = &self.phase else {
            return Err(self.wrong_phase(action.action_type));
        };
        let mut setup = setup.clone();
        let seat = action.seat;

        match (setup.current_prompt(), action.action_type) {
            (Some(SetupPrompt::Settlement), ActionType::BuildSettlement) => {
                let node = expect_node(&action.payload)?;
                self.board.graph.place_settlement(node, seat, false)?;
                self.players[seat].record_settlement(node);
                if setup.is_second_round() {
                    self.award_starting_resources(seat, node, events)?;
                }
                setup.last_settlement = Some(node);
                events.push(GameEvent::Built {
                    seat,
                    kind: StructureKind::Settlement,
                    location: node,
                });
            }
            (Some(SetupPrompt::Road), ActionType::BuildRoad) => {
                let edge = expect_edge(&action.payload)?;
                let touches_settlement = setup
                    .last_settlement
                    .is_some_and(|node| self.board.graph.edge(edge).is_ok_and(|e| e.touches(node)));
                if !touches_settlement {
                    return Err(BoardError::from(PlacementViolation::NotConnected).into());
                }
                self.board.graph.place_road(edge, seat, false)?;
                self.players[seat].record_road(edge);
                setup.last_settlement = None;
                events.push(GameEvent::Built {
                    seat,
                    kind: StructureKind::Road,
                    location: edge,
                });
            }
            (_, other) => return Err(self.wrong_phase(other)),
        }

        setup.advance();
        if setup.is_complete() {
            debug!("setup complete, first turn begins");
            self.current_seat = 0;
            self.turn = 1;
            self.phase = TurnPhase::AwaitingRoll;
            events.push(GameEvent::TurnAdvanced { seat: 0 });
        } else {
            self.current_seat = setup.current_seat().unwrap_or(0);
            self.phase = TurnPhase::Setup(setup);
        }
        Ok(())
    }

    fn award_starting_resources(
        &mut self,
        seat: usize,
        node: NodeId,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let mut bundle = ResourceBundle::zero();
        for tile in &self.board.graph.node(node)?.tiles {
            if let Some(resource) = self.board.tile(*tile).and_then(|t| t.resource) {
                bundle.add(resource, 1);
            }
        }
        if !bundle.is_empty() {
            self.ledger.dispense(seat, &bundle)?;
            events.push(GameEvent::Produced(ProductionReport {
                deltas: vec![(seat, bundle)],
                withheld: Vec::new(),
            }));
        }
        Ok(())
    }

    fn resolve_roll(
        &mut self,
        seat: usize,
        outcome: DiceOutcome,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        self.last_roll = Some(outcome);
        self.rolled_this_turn = true;
        events.push(GameEvent::DiceRolled { seat, outcome });

        if outcome.triggers_robber() {
            self.discard_half(events)?;
            self.phase = TurnPhase::MovingRobber;
            return Ok(());
        }

        let plan = DiceResolver::resolve_production(&outcome, &self.board, self.robber_tile);
        let report = self.ledger.apply_production(&plan)?;
        events.push(GameEvent::Produced(report));
        self.phase = TurnPhase::ProductionResolved;
        debug!(sum = outcome.sum(), "production resolved");
        self.phase = TurnPhase::ActionPhase;
        Ok(())
    }

    fn discard_half(&mut self, events: &mut Vec<GameEvent>) -> Result<(), GameError> {
        for seat in 0..self.players.len() {
            let held = *self.ledger.holdings(seat)?;
            if held.total() <= self.config.discard_limit {
                continue;
            }
            let bundle = random_discard_bundle(&held, held.total() / 2, self.dice.rng());
            self.ledger.pay(seat, &bundle)?;
            events.push(GameEvent::Discarded { seat, bundle });
        }
        Ok(())
    }

    fn move_robber(
        &mut self,
        action: &GameAction,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let ActionPayload::Robber { tile, victim } = action.payload else {
            return Err(GameError::InvalidPayload("expected a robber target"));
        };
        let target = self.board.tile(tile).ok_or(GameError::UnknownTile(tile))?;
        if self.robber_tile == Some(tile) {
            return Err(GameError::RobberMustMove);
        }

        let mut stolen = false;
        if let Some(victim) = victim {
            let on_tile = target
                .nodes
                .iter()
                .any(|node| {
                    self.board.graph.structure_at(*node).map(|s| s.owner()) == Some(victim)
                });
            if victim == action.seat || victim >= self.players.len() || !on_tile {
                return Err(GameError::InvalidVictim(victim));
            }
            let held = *self.ledger.holdings(victim)?;
            if let Some(resource) = random_card(&held, self.dice.rng()) {
                self.ledger.transfer(victim, action.seat, resource, 1)?;
                stolen = true;
            }
        }

        self.robber_tile = Some(tile);
        self.phase = if self.rolled_this_turn {
            TurnPhase::ActionPhase
        } else {
            TurnPhase::AwaitingRoll
        };
        events.push(GameEvent::RobberMoved {
            seat: action.seat,
            tile,
            victim,
            stolen,
        });
        Ok(())
    }

    fn handle_turn_action(
        &mut self,
        action: &GameAction,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let seat = action.seat;
        match action.action_type {
            ActionType::BuildRoad => self.build(seat, StructureKind::Road, &action.payload, events),
            ActionType::BuildSettlement => {
                self.build(seat, StructureKind::Settlement, &action.payload, events)
            }
            ActionType::BuildCity => self.build(seat, StructureKind::City, &action.payload, events),
            ActionType::BuyDevelopmentCard => self.buy_development_card(seat, events),
            ActionType::PlayDevelopmentCard => self.play_card(action, events),
            ActionType::MaritimeTrade => self.maritime_trade(seat, &action.payload, events),
            ActionType::OfferTrade => self.offer_trade(seat, &action.payload, events),
            ActionType::EndTurn => {
                self.end_turn(events);
                Ok(())
            }
            other => Err(self.wrong_phase(other)),
        }
    }

    fn build(
        &mut self,
        seat: usize,
        kind: StructureKind,
        payload: &ActionPayload,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let location = match kind {
            StructureKind::Road => expect_edge(payload)?,
            StructureKind::Settlement | StructureKind::City => expect_node(payload)?,
        };
        if self.players[seat].limit_reached(kind) {
            return Err(GameError::StructureLimit(kind));
        }
        match kind {
            StructureKind::Road => self.board.graph.check_road(location, seat, true)?,
            StructureKind::Settlement => self.board.graph.check_settlement(location, seat, true)?,
            StructureKind::City => self.board.graph.check_city(location, seat)?,
        }

        if !self.players[seat].free_builds.take(kind) {
            self.ledger.pay(seat, &build_cost(kind))?;
        }

        match kind {
            StructureKind::Road => {
                self.board.graph.place_road(location, seat, true)?;
                self.players[seat].record_road(location);
            }
            StructureKind::Settlement => {
                self.board.graph.place_settlement(location, seat, true)?;
                self.players[seat].record_settlement(location);
            }
            StructureKind::City => {
                self.board.graph.upgrade_to_city(location, seat)?;
                self.players[seat].record_city(location);
            }
        }
        events.push(GameEvent::Built {
            seat,
            kind,
            location,
        });
        Ok(())
    }

    fn buy_development_card(
        &mut self,
        seat: usize,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        if self.deck.is_empty() {
            return Err(GameError::DeckEmpty);
        }
        self.ledger.pay(seat, &COST_DEVELOPMENT)?;
        let kind = self.deck.draw().ok_or(GameError::DeckEmpty)?;
        self.players[seat].add_card(kind, self.turn);
        events.push(GameEvent::CardBought { seat });
        Ok(())
    }

    fn play_card(
        &mut self,
        action: &GameAction,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let ActionPayload::Card(play) = action.payload else {
            return Err(GameError::InvalidPayload("expected a card play"));
        };
        let seat = action.seat;
        if self.players[seat].played_card_this_turn {
            return Err(GameError::CardAlreadyPlayed);
        }
        let index = self.players[seat]
            .playable_card(play.kind(), self.turn)
            .ok_or(GameError::CardNotPlayable(play.kind()))?;
        self.players[seat].mark_played(index);

        match play {
            CardPlay::Knight => self.phase = TurnPhase::MovingRobber,
            CardPlay::RoadBuilding => self.players[seat].free_builds.grant_card_roads(2),
            CardPlay::YearOfPlenty(first, second) => {
                let mut bundle = ResourceBundle::single(first, 1);
                bundle.add(second, 1);
                self.ledger.dispense(seat, &bundle)?;
            }
            CardPlay::Monopoly(resource) => {
                for other in 0..self.players.len() {
                    if other == seat {
                        continue;
                    }
                    let amount = self.ledger.holdings(other)?.get(resource);
                    if amount > 0 {
                        self.ledger.transfer(other, seat, resource, amount)?;
                    }
                }
            }
        }
        events.push(GameEvent::CardPlayed { seat, play });
        Ok(())
    }

    /// Best bank rate for giving `resource`: 2 with its own harbor, 3 with a
    /// generic harbor, 4 otherwise.
    pub fn maritime_rate(&self, seat: usize, resource: Resource) -> u8 {
        let mut rate = 4;
        for (node, _) in self.board.graph.structures_of(seat) {
            match self.board.graph.node(node).ok().and_then(|n| n.harbor) {
                Some(Harbor::Specific(r)) if r == resource => return 2,
                Some(Harbor::Generic) => rate = 3,
                _ => {}
            }
        }
        rate
    }

    fn maritime_trade(
        &mut self,
        seat: usize,
        payload: &ActionPayload,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let ActionPayload::MaritimeTrade {
            give,
            receive,
            count,
        } = *payload
        else {
            return Err(GameError::InvalidPayload("expected a maritime trade"));
        };
        if give == receive || count == 0 {
            return Err(GameError::InvalidTrade("must exchange different resources"));
        }
        let rate = self.maritime_rate(seat, give);
        let amount = rate
            .checked_mul(count)
            .ok_or(GameError::InvalidTrade("trade too large"))?;

        let gave = ResourceBundle::single(give, amount);
        let received = ResourceBundle::single(receive, count);
        self.ledger.pay(seat, &gave)?;
        self.ledger.dispense(seat, &received)?;
        events.push(GameEvent::MaritimeTraded {
            seat,
            gave,
            received,
        });
        Ok(())
    }

    fn offer_trade(
        &mut self,
        seat: usize,
        payload: &ActionPayload,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let ActionPayload::Trade {
            give,
            receive,
            counterparty,
        } = *payload
        else {
            return Err(GameError::InvalidPayload("expected a trade offer"));
        };
        if self.pending_trade.is_some() {
            return Err(GameError::TradePending);
        }
        if counterparty == seat || counterparty >= self.players.len() {
            return Err(GameError::InvalidTrade("counterparty must be another seat"));
        }
        if give.is_empty() || receive.is_empty() {
            return Err(GameError::InvalidTrade("both sides must offer something"));
        }
        if !self.ledger.holdings(seat)?.can_afford(&give) {
            return Err(GameError::InvalidTrade("offer exceeds holdings"));
        }

        let offer = TradeOffer {
            from: seat,
            to: counterparty,
            give,
            receive,
        };
        self.pending_trade = Some(offer);
        events.push(GameEvent::TradeOffered(offer));
        Ok(())
    }

    fn respond_trade(
        &mut self,
        action: &GameAction,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let ActionPayload::Respond(accept) = action.payload else {
            return Err(GameError::InvalidPayload("expected accept or decline"));
        };
        let offer = match self.pending_trade {
            Some(offer) if offer.to == action.seat => offer,
            _ => return Err(GameError::NoPendingTrade(action.seat)),
        };
        if accept {
            self.ledger
                .exchange(offer.from, &offer.give, offer.to, &offer.receive)?;
        }
        self.pending_trade = None;
        events.push(GameEvent::TradeResolved { offer, accepted: accept });
        Ok(())
    }

    fn end_turn(&mut self, events: &mut Vec<GameEvent>) {
        self.phase = TurnPhase::TurnEnded;
        self.players[self.current_seat].reset_for_new_turn();
        self.pending_trade = None;
        self.rolled_this_turn = false;
        self.current_seat = (self.current_seat + 1) % self.players.len();
        self.turn += 1;
        self.phase = TurnPhase::AwaitingRoll;
        events.push(GameEvent::TurnAdvanced {
            seat: self.current_seat,
        });
    }

    fn update_longest_road(&mut self, events: &mut Vec<GameEvent>) {
        let lengths: Vec<usize> = (0..self.players.len())
            .map(|seat| self.board.graph.longest_road(seat))
            .collect();
        let holder = self.players.iter().position(|p| p.has_longest_road);
        let best = lengths.iter().copied().max().unwrap_or(0);

        let next = if best < MIN_LONGEST_ROAD {
            None
        } else if holder.is_some_and(|h| lengths[h] == best) {
            holder
        } else {
            let leaders: Vec<usize> = (0..lengths.len()).filter(|s| lengths[*s] == best).collect();
            match leaders.as_slice() {
                [only] => Some(*only),
                _ => None,
            }
        };

        if next != holder {
            for (seat, player) in self.players.iter_mut().enumerate() {
                player.has_longest_road = Some(seat) == next;
            }
            events.push(GameEvent::LongestRoadChanged { holder: next });
        }
    }

    fn update_largest_army(&mut self, events: &mut Vec<GameEvent>) {
        let holder = self.players.iter().position(|p| p.has_largest_army);
        let to_beat = holder.map_or(MIN_LARGEST_ARMY - 1, |h| self.players[h].knights_played);
        let challenger = self
            .players
            .iter()
            .filter(|p| Some(p.seat) != holder && p.knights_played > to_beat)
            .max_by_key(|p| p.knights_played)
            .map(|p| p.seat);

        if let Some(seat) = challenger {
            for player in self.players.iter_mut() {
                player.has_largest_army = player.seat == seat;
            }
            events.push(GameEvent::LargestArmyChanged { holder: Some(seat) });
        }
    }

    fn check_victory(&mut self, events: &mut Vec<GameEvent>) {
        if self.is_over() {
            return;
        }
        let n = self.players.len();
        let winner = (0..n)
            .map(|offset| (self.current_seat + offset) % n)
            .find(|seat| self.players[*seat].total_points() >= self.config.vps_to_win);
        if let Some(winner) = winner {
            self.phase = TurnPhase::GameOver { winner };
            self.pending_trade = None;
            events.push(GameEvent::GameWon { winner });
        }
    }

    fn refresh_legal_actions(&mut self) {
        self.legal_actions = self.compute_legal_actions();
    }

    fn compute_legal_actions(&self) -> Vec<GameAction> {
        let seat = self.current_seat;
        let mut actions = match &self.phase {
            TurnPhase::Setup(setup) => self.legal_setup_actions(setup),
            TurnPhase::AwaitingRoll => {
                let mut actions = vec![GameAction::new(seat, ActionType::Roll)];
                actions.extend(self.legal_card_actions(seat));
                actions
            }
            TurnPhase::MovingRobber => self.legal_robber_actions(seat),
            TurnPhase::ActionPhase => self.legal_turn_actions(seat),
            _ => Vec::new(),
        };
        if let Some(offer) = self.pending_trade {
            actions.push(
                GameAction::new(offer.to, ActionType::RespondTrade)
                    .with_payload(ActionPayload::Respond(false)),
            );
            let affordable = self
                .ledger
                .holdings(offer.to)
                .is_ok_and(|h| h.can_afford(&offer.receive));
            if affordable && self.offer_covered(&offer) {
                actions.push(
                    GameAction::new(offer.to, ActionType::RespondTrade)
                        .with_payload(ActionPayload::Respond(true)),
                );
            }
        }
        actions
    }

    fn legal_setup_actions(&self, setup: &SetupState) -> Vec<GameAction> {
        let Some(seat) = setup.current_seat() else {
            return Vec::new();
        };
        match setup.current_prompt() {
            Some(SetupPrompt::Settlement) => self
                .board
                .land_nodes()
                .filter(|node| self.board.graph.check_settlement(*node, seat, false).is_ok())
                .map(|node| {
                    GameAction::new(seat, ActionType::BuildSettlement)
                        .with_payload(ActionPayload::Node(node))
                })
                .collect(),
            Some(SetupPrompt::Road) => {
                let Some(node) = setup.last_settlement else {
                    return Vec::new();
                };
                self.board
                    .graph
                    .incident_edges(node)
                    .iter()
                    .copied()
                    .filter(|edge| self.board.graph.check_road(*edge, seat, false).is_ok())
                    .map(|edge| {
                        GameAction::new(seat, ActionType::BuildRoad)
                            .with_payload(ActionPayload::Edge(edge))
                    })
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn legal_robber_actions(&self, seat: usize) -> Vec<GameAction> {
        let mut actions = Vec::new();
        for tile in &self.board.tiles {
            if Some(tile.id) == self.robber_tile {
                continue;
            }
            let victims: Vec<usize> = tile
                .nodes
                .iter()
                .filter_map(|node| self.board.graph.structure_at(*node))
                .map(|structure| structure.owner())
                .filter(|owner| *owner != seat && self.ledger.card_count(*owner) > 0)
                .unique()
                .collect();
            if victims.is_empty() {
                actions.push(GameAction::new(seat, ActionType::MoveRobber).with_payload(
                    ActionPayload::Robber {
                        tile: tile.id,
                        victim: None,
                    },
                ));
            }
            for victim in victims {
                actions.push(GameAction::new(seat, ActionType::MoveRobber).with_payload(
                    ActionPayload::Robber {
                        tile: tile.id,
                        victim: Some(victim),
                    },
                ));
            }
        }
        actions
    }

    fn can_build(&self, seat: usize, kind: StructureKind) -> bool {
        let player = &self.players[seat];
        if player.limit_reached(kind) {
            return false;
        }
        player.free_builds.get(kind) > 0
            || self
                .ledger
                .holdings(seat)
                .is_ok_and(|h| h.can_afford(&build_cost(kind)))
    }

    fn legal_turn_actions(&self, seat: usize) -> Vec<GameAction> {
        let mut actions = vec![GameAction::new(seat, ActionType::EndTurn)];
        let graph = &self.board.graph;

        if self.can_build(seat, StructureKind::Road) {
            for edge in graph.edges() {
                if graph.check_road(edge.id, seat, true).is_ok() {
                    actions.push(
                        GameAction::new(seat, ActionType::BuildRoad)
                            .with_payload(ActionPayload::Edge(edge.id)),
                    );
                }
            }
        }
        if self.can_build(seat, StructureKind::Settlement) {
            for node in self.board.land_nodes() {
                if graph.check_settlement(node, seat, true).is_ok() {
                    actions.push(
                        GameAction::new(seat, ActionType::BuildSettlement)
                            .with_payload(ActionPayload::Node(node)),
                    );
                }
            }
        }
        if self.can_build(seat, StructureKind::City) {
            for node in &self.players[seat].settlements {
                actions.push(
                    GameAction::new(seat, ActionType::BuildCity)
                        .with_payload(ActionPayload::Node(*node)),
                );
            }
        }
        let can_buy = self
            .ledger
            .holdings(seat)
            .is_ok_and(|h| h.can_afford(&COST_DEVELOPMENT));
        if !self.deck.is_empty() && can_buy {
            actions.push(GameAction::new(seat, ActionType::BuyDevelopmentCard));
        }

        actions.extend(self.legal_maritime_trades(seat));
        actions.extend(self.legal_card_actions(seat));
        actions
    }

    fn legal_maritime_trades(&self, seat: usize) -> Vec<GameAction> {
        let Ok(held) = self.ledger.holdings(seat) else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        for give in Resource::ALL {
            if held.get(give) < self.maritime_rate(seat, give) {
                continue;
            }
            for receive in Resource::ALL {
                if receive == give || self.ledger.bank().get(receive) == 0 {
                    continue;
                }
                actions.push(GameAction::new(seat, ActionType::MaritimeTrade).with_payload(
                    ActionPayload::MaritimeTrade {
                        give,
                        receive,
                        count: 1,
                    },
                ));
            }
        }
        actions
    }

    fn legal_card_actions(&self, seat: usize) -> Vec<GameAction> {
        let player = &self.players[seat];
        if player.played_card_this_turn {
            return Vec::new();
        }
        let playable = |play: CardPlay| player.playable_card(play.kind(), self.turn).is_some();
        let as_action = |play: CardPlay| {
            GameAction::new(seat, ActionType::PlayDevelopmentCard)
                .with_payload(ActionPayload::Card(play))
        };

        let mut plays = Vec::new();
        if playable(CardPlay::Knight) {
            plays.push(CardPlay::Knight);
        }
        if playable(CardPlay::RoadBuilding) && !player.limit_reached(StructureKind::Road) {
            plays.push(CardPlay::RoadBuilding);
        }
        if playable(CardPlay::Monopoly(Resource::Wood)) {
            plays.extend(Resource::ALL.into_iter().map(CardPlay::Monopoly));
        }
        if playable(CardPlay::YearOfPlenty(Resource::Wood, Resource::Wood)) {
            let bank = self.ledger.bank();
            for (first, second) in Resource::ALL
                .into_iter()
                .tuple_combinations::<(_, _)>()
                .chain(Resource::ALL.into_iter().map(|r| (r, r)))
            {
                let mut bundle = ResourceBundle::single(first, 1);
                bundle.add(second, 1);
                if bank.can_afford(&bundle) {
                    plays.push(CardPlay::YearOfPlenty(first, second));
                }
            }
        }
        plays.into_iter().map(as_action).collect()
    }

    fn ensure_seat(&self, seat: usize) -> Result<(), GameError> {
        if seat < self.players.len() {
            Ok(())
        } else {
            Err(GameError::InvalidSeat(seat))
        }
    }

    fn wrong_phase(&self, action: ActionType) -> GameError {
        GameError::WrongPhase {
            phase: self.phase.label(),
            action,
        }
    }
}

fn expect_node(payload: &ActionPayload) -> Result<NodeId, GameError> {
    match payload {
        ActionPayload::Node(node) => Ok(*node),
        _ => Err(GameError::InvalidPayload("expected a node")),
    }
}

fn expect_edge(payload: &ActionPayload) -> Result<EdgeId, GameError> {
    match payload {
        ActionPayload::Edge(edge) => Ok(*edge),
        _ => Err(GameError::InvalidPayload("expected an edge")),
    }
}

/// One card drawn uniformly from everything `held` contains.
fn random_card(held: &ResourceBundle, rng: &mut impl Rng) -> Option<Resource> {
    let total = held.total();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for (resource, amount) in held.iter() {
        if pick < amount as u32 {
            return Some(resource);
        }
        pick -= amount as u32;
    }
    None
}

fn random_discard_bundle(
    held: &ResourceBundle,
    required: u32,
    rng: &mut impl Rng,
) -> ResourceBundle {
    let mut remaining = *held;
    let mut bundle = ResourceBundle::zero();
    for _ in 0..required {
        let Some(resource) = random_card(&remaining, rng) else {
            break;
        };
        bundle.add(resource, 1);
        if remaining.subtract(resource, 1).is_err() {
            break;
        }
    }
    bundle
}
