use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::cheat;
use crate::game::action::{ActionPayload, GameAction};
use crate::game::state::{GameError, GameEvent, GameSnapshot, GameState, StepOutcome};
use crate::session::SessionError;
use crate::session::context::{SessionConfig, SessionContext};
use crate::session::protocol::{BuildTarget, Event, Notification, Request, RequestKind};
use crate::types::{ActionType, SessionId, StructureKind, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    GameOver,
    /// Every player has left.
    Abandoned,
    /// An internal invariant failed; no further requests are accepted.
    NeedsRecovery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: SessionStatus,
    pub sequence: u64,
    pub game: GameSnapshot,
}

struct Inner {
    game: GameState,
    status: SessionStatus,
    sequence: u64,
    subscribers: HashMap<UserId, UnboundedSender<Notification>>,
}

/// Owns one running game. Every mutation goes through the write lock, and the
/// resulting notifications are sent before the lock is released, so each
/// subscriber sees a session's events in commit order.
pub struct SessionCoordinator {
    id: SessionId,
    config: SessionConfig,
    context: SessionContext,
    inner: RwLock<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        id: SessionId,
        roster: &[UserId],
        config: SessionConfig,
        context: SessionContext,
    ) -> Result<Self, GameError> {
        let game = GameState::new(config.game.clone(), roster)?;
        info!(
            session = %id,
            players = roster.len(),
            map = %config.game.map_type,
            "session started"
        );
        Ok(Self {
            id,
            config,
            context,
            inner: RwLock::new(Inner {
                game,
                status: SessionStatus::Active,
                sequence: 0,
                subscribers: HashMap::new(),
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.read().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read();
        SessionSnapshot {
            id: self.id,
            status: inner.status,
            sequence: inner.sequence,
            game: inner.game.snapshot(),
        }
    }

    /// Runs `f` against the committed game under the read lock.
    pub fn with_game<R>(&self, f: impl FnOnce(&GameState) -> R) -> R {
        f(&self.inner.read().game)
    }

    pub fn subscribe(&self, user: UserId) -> Result<UnboundedReceiver<Notification>, SessionError> {
        let mut inner = self.inner.write();
        self.seat_of(&inner, user)?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.insert(user, tx);
        debug!(session = %self.id, %user, "subscribed");
        Ok(rx)
    }

    pub fn unsubscribe(&self, user: UserId) -> bool {
        self.inner.write().subscribers.remove(&user).is_some()
    }

    /// Applies one request. Rejections are sent to the requester only and
    /// returned; committed events go to every subscriber.
    pub fn dispatch(&self, request: Request) -> Result<Vec<Event>, SessionError> {
        if request.session != self.id {
            return Err(SessionError::NotFound(request.session));
        }
        let mut inner = self.inner.write();
        self.ensure_healthy(&inner)?;
        let player = request.player;
        let seat = self.seat_of(&inner, player)?;
        debug!(session = %self.id, %player, seat, kind = ?request.kind, "dispatch");

        let result = match request.kind {
            RequestKind::ChatInput { text, timestamp } => {
                return self.handle_chat(&mut inner, seat, player, text, timestamp);
            }
            kind => to_action(&inner.game, seat, kind).and_then(|action| inner.game.step(action)),
        };
        self.settle(&mut inner, player, result)
    }

    /// Unsubscribes the player and marks their seat departed. The seat keeps
    /// its place in turn order.
    pub fn player_left(&self, user: UserId) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        let seat = self.seat_of(&inner, user)?;
        inner.subscribers.remove(&user);
        inner
            .game
            .mark_departed(seat)
            .map_err(SessionError::Rejected)?;
        warn!(session = %self.id, %user, seat, "player left");
        self.publish(&mut inner, Event::PlayerLeft { player: user });

        let everyone_gone = inner.game.players().iter().all(|p| p.departed);
        if everyone_gone && inner.status == SessionStatus::Active {
            info!(session = %self.id, "all players left, session abandoned");
            inner.status = SessionStatus::Abandoned;
        }
        Ok(())
    }

    /// Ends the current turn on behalf of an external timeout policy.
    pub fn expire_turn(&self) -> Result<Vec<Event>, SessionError> {
        let mut inner = self.inner.write();
        self.ensure_healthy(&inner)?;
        let current = inner.game.current_seat();
        let user = inner.game.players()[current].user;
        info!(session = %self.id, seat = current, "turn expired");
        let result = inner.game.force_end_turn();
        self.settle(&mut inner, user, result)
    }

    fn handle_chat(
        &self,
        inner: &mut Inner,
        seat: usize,
        player: UserId,
        text: String,
        timestamp: u64,
    ) -> Result<Vec<Event>, SessionError> {
        if cheat::is_cheat(&text) {
            match cheat::parse(&text) {
                Some(command)
                    if self.config.cheats_enabled && self.context.identity.may_cheat(player) =>
                {
                    info!(session = %self.id, %player, %command, "cheat applied");
                    let result = cheat::execute(command, &mut inner.game, seat);
                    return self.settle(inner, player, result);
                }
                Some(command) => {
                    warn!(
                        session = %self.id,
                        %player,
                        %command,
                        "unauthorized cheat relayed as chat"
                    );
                }
                None => debug!(
                    session = %self.id,
                    %player,
                    "cheat arguments unreadable, relayed as chat"
                ),
            }
        }
        let event = Event::ChatRelayed {
            player,
            text,
            timestamp,
        };
        self.publish(inner, event.clone());
        Ok(vec![event])
    }

    fn settle(
        &self,
        inner: &mut Inner,
        player: UserId,
        result: Result<StepOutcome, GameError>,
    ) -> Result<Vec<Event>, SessionError> {
        match result {
            Ok(outcome) => {
                let events: Vec<Event> = outcome
                    .events
                    .iter()
                    .map(|event| translate(&inner.game, player, event))
                    .collect();
                for event in &events {
                    self.publish(inner, event.clone());
                }
                if outcome.done {
                    info!(session = %self.id, winner = ?inner.game.winner(), "game over");
                    inner.status = SessionStatus::GameOver;
                }
                Ok(events)
            }
            Err(err) if err.is_fatal() => {
                error!(
                    session = %self.id,
                    error = %err,
                    "invariant violated, session needs recovery"
                );
                inner.status = SessionStatus::NeedsRecovery;
                Err(SessionError::NeedsRecovery(self.id))
            }
            Err(err) => {
                debug!(session = %self.id, %player, error = %err, "action rejected");
                let rejection = Event::ActionRejected {
                    player,
                    reason: err.to_string(),
                };
                self.send_to(inner, player, rejection);
                Err(SessionError::Rejected(err))
            }
        }
    }

    fn publish(&self, inner: &mut Inner, event: Event) {
        inner.sequence += 1;
        let notification = Notification {
            session: self.id,
            sequence: inner.sequence,
            event,
        };
        inner
            .subscribers
            .retain(|_, tx| tx.send(notification.clone()).is_ok());
    }

    /// Private messages carry the sequence of the last broadcast so they can
    /// be placed in the stream without leaving gaps for other subscribers.
    fn send_to(&self, inner: &mut Inner, user: UserId, event: Event) {
        let notification = Notification {
            session: self.id,
            sequence: inner.sequence,
            event,
        };
        let delivered = inner
            .subscribers
            .get(&user)
            .is_some_and(|tx| tx.send(notification).is_ok());
        if !delivered {
            inner.subscribers.remove(&user);
        }
    }

    fn ensure_healthy(&self, inner: &Inner) -> Result<(), SessionError> {
        if inner.status == SessionStatus::NeedsRecovery {
            return Err(SessionError::NeedsRecovery(self.id));
        }
        Ok(())
    }

    fn seat_of(&self, inner: &Inner, user: UserId) -> Result<usize, SessionError> {
        inner.game.seat_of(user).ok_or(SessionError::NotInSession {
            session: self.id,
            user,
        })
    }
}

fn to_action(game: &GameState, seat: usize, kind: RequestKind) -> Result<GameAction, GameError> {
    let action = match kind {
        RequestKind::Roll => GameAction::new(seat, ActionType::Roll),
        RequestKind::Build { target, structure } => match (structure, target) {
            (StructureKind::Road, BuildTarget::Edge(edge)) => {
                GameAction::new(seat, ActionType::BuildRoad).with_payload(ActionPayload::Edge(edge))
            }
            (StructureKind::Settlement, BuildTarget::Node(node)) => {
                GameAction::new(seat, ActionType::BuildSettlement)
                    .with_payload(ActionPayload::Node(node))
            }
            (StructureKind::City, BuildTarget::Node(node)) => {
                GameAction::new(seat, ActionType::BuildCity).with_payload(ActionPayload::Node(node))
            }
            _ => {
                return Err(GameError::InvalidPayload(
                    "roads go on edges, settlements and cities on nodes",
                ));
            }
        },
        RequestKind::Trade {
            offer,
            want,
            counterparty: Some(user),
        } => {
            let counterparty = game
                .seat_of(user)
                .ok_or(GameError::InvalidTrade("counterparty is not in this game"))?;
            GameAction::new(seat, ActionType::OfferTrade).with_payload(ActionPayload::Trade {
                give: offer,
                receive: want,
                counterparty,
            })
        }
        RequestKind::Trade {
            offer,
            want,
            counterparty: None,
        } => {
            let (give, amount) = offer
                .single_kind()
                .ok_or(GameError::InvalidTrade("bank trades give a single resource"))?;
            let (receive, count) = want
                .single_kind()
                .ok_or(GameError::InvalidTrade("bank trades take a single resource"))?;
            let rate = game.maritime_rate(seat, give) as u32;
            if amount as u32 != rate * count as u32 {
                return Err(GameError::InvalidTrade("offer does not match the bank rate"));
            }
            GameAction::new(seat, ActionType::MaritimeTrade).with_payload(
                ActionPayload::MaritimeTrade {
                    give,
                    receive,
                    count,
                },
            )
        }
        RequestKind::RespondTrade { accept } => GameAction::new(seat, ActionType::RespondTrade)
            .with_payload(ActionPayload::Respond(accept)),
        RequestKind::BuyCard => GameAction::new(seat, ActionType::BuyDevelopmentCard),
        RequestKind::PlayCard { play } => GameAction::new(seat, ActionType::PlayDevelopmentCard)
            .with_payload(ActionPayload::Card(play)),
        RequestKind::MoveRobber { tile, victim } => {
            let victim = match victim {
                Some(user) => Some(
                    game.seat_of(user)
                        .ok_or(GameError::InvalidPayload("victim is not in this game"))?,
                ),
                None => None,
            };
            GameAction::new(seat, ActionType::MoveRobber)
                .with_payload(ActionPayload::Robber { tile, victim })
        }
        RequestKind::EndTurn => GameAction::new(seat, ActionType::EndTurn),
        RequestKind::ChatInput { .. } => {
            return Err(GameError::InvalidPayload("chat is not a game action"));
        }
    };
    Ok(action)
}

fn translate(game: &GameState, requester: UserId, event: &GameEvent) -> Event {
    let user = |seat: usize| game.players()[seat].user;
    match event {
        GameEvent::DiceRolled { seat, outcome } => Event::DiceResolved {
            player: user(*seat),
            outcome: *outcome,
        },
        GameEvent::Produced(report) => Event::Production {
            deltas: report
                .deltas
                .iter()
                .map(|(seat, bundle)| (user(*seat), *bundle))
                .collect(),
            withheld: report.withheld.clone(),
        },
        GameEvent::TurnAdvanced { seat } => Event::TurnAdvanced {
            current: user(*seat),
            seat: *seat,
        },
        GameEvent::GameWon { winner } => Event::GameOver {
            winner: user(*winner),
        },
        other => Event::ActionApplied {
            player: Some(requester),
            summary: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::game::state::{GameConfig, TurnPhase};
    use crate::session::context::{CheatAllowList, StaticRosters};
    use crate::types::Resource;

    struct Table {
        session: SessionCoordinator,
        players: Vec<UserId>,
    }

    fn table(cheats_enabled: bool, allow_first: bool) -> Table {
        let players = vec![UserId::new(), UserId::new()];
        let allowed = if allow_first { vec![players[0]] } else { vec![] };
        let context = SessionContext::new(
            Arc::new(CheatAllowList::new(allowed)),
            Arc::new(StaticRosters::default()),
        );
        let config = SessionConfig {
            cheats_enabled,
            game: GameConfig {
                auto_placement: true,
                seed: 77,
                ..GameConfig::default()
            },
        };
        let session = SessionCoordinator::new(SessionId::new(), &players, config, context).unwrap();
        Table { session, players }
    }

    fn request(table: &Table, player: usize, kind: RequestKind) -> Request {
        Request::new(table.session.id(), table.players[player], kind)
    }

    fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(note) = rx.try_recv() {
            out.push(note);
        }
        out
    }

    #[test]
    fn test_events_fan_out_in_sequence() {
        let t = table(false, false);
        let mut rx_a = t.session.subscribe(t.players[0]).unwrap();
        let mut rx_b = t.session.subscribe(t.players[1]).unwrap();

        let events = t.session.dispatch(request(&t, 0, RequestKind::Roll)).unwrap();
        assert!(matches!(events[0], Event::DiceResolved { .. }));

        let a = drain(&mut rx_a);
        let b = drain(&mut rx_b);
        assert_eq!(a, b);
        assert_eq!(a.len(), events.len());
        let sequences: Vec<u64> = a.iter().map(|n| n.sequence).collect();
        let expected: Vec<u64> = (1..=events.len() as u64).collect();
        assert_eq!(sequences, expected);
    }

    #[test]
    fn test_rejection_goes_to_requester_only() {
        let t = table(false, false);
        let mut rx_a = t.session.subscribe(t.players[0]).unwrap();
        let mut rx_b = t.session.subscribe(t.players[1]).unwrap();
        let before = t.session.snapshot();

        let err = t.session.dispatch(request(&t, 1, RequestKind::Roll)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(GameError::NotYourTurn { .. })
        ));
        assert!(drain(&mut rx_a).is_empty());
        let b = drain(&mut rx_b);
        assert_eq!(b.len(), 1);
        assert!(matches!(b[0].event, Event::ActionRejected { .. }));

        let after = t.session.snapshot();
        assert_eq!(after.game.phase, before.game.phase);
        assert_eq!(after.game.current_seat, before.game.current_seat);
        assert_eq!(after.sequence, before.sequence);
    }

    #[test]
    fn test_unknown_user_is_not_in_session() {
        let t = table(false, false);
        let stranger = UserId::new();
        let err = t
            .session
            .dispatch(Request::new(t.session.id(), stranger, RequestKind::Roll))
            .unwrap_err();
        assert!(matches!(err, SessionError::NotInSession { .. }));
        assert!(t.session.subscribe(stranger).is_err());
    }

    #[test]
    fn test_chat_is_relayed() {
        let t = table(false, false);
        let mut rx = t.session.subscribe(t.players[1]).unwrap();
        let events = t
            .session
            .dispatch(request(
                &t,
                0,
                RequestKind::ChatInput {
                    text: "good luck".into(),
                    timestamp: 5,
                },
            ))
            .unwrap();
        assert_eq!(
            events,
            vec![Event::ChatRelayed {
                player: t.players[0],
                text: "good luck".into(),
                timestamp: 5
            }]
        );
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_authorized_cheat_forces_roll() {
        let t = table(true, true);
        let events = t
            .session
            .dispatch(request(
                &t,
                0,
                RequestKind::ChatInput {
                    text: "roll 9".into(),
                    timestamp: 1,
                },
            ))
            .unwrap();
        assert!(matches!(
            events[0],
            Event::DiceResolved { outcome, .. } if outcome.dice == (6, 3)
        ));
        assert_eq!(t.session.snapshot().game.phase, TurnPhase::ActionPhase);
    }

    #[test]
    fn test_unauthorized_cheat_becomes_chat() {
        for (enabled, allowed, sender) in [(false, true, 0), (true, false, 0), (true, true, 1)] {
            let t = table(enabled, allowed);
            let events = t
                .session
                .dispatch(request(
                    &t,
                    sender,
                    RequestKind::ChatInput {
                        text: "roll 9".into(),
                        timestamp: 1,
                    },
                ))
                .unwrap();
            assert!(matches!(events[0], Event::ChatRelayed { .. }));
            assert_eq!(t.session.snapshot().game.phase, TurnPhase::AwaitingRoll);
        }
    }

    #[test]
    fn test_cheat_missing_argument_is_chat() {
        let t = table(true, true);
        let events = t
            .session
            .dispatch(request(
                &t,
                0,
                RequestKind::ChatInput {
                    text: "roll".into(),
                    timestamp: 1,
                },
            ))
            .unwrap();
        assert!(matches!(events[0], Event::ChatRelayed { .. }));
    }

    #[test]
    fn test_bank_trade_request_checks_rate() {
        let t = table(true, true);
        t.session
            .dispatch(request(
                &t,
                0,
                RequestKind::ChatInput {
                    text: "roll 8".into(),
                    timestamp: 1,
                },
            ))
            .unwrap();
        let err = t
            .session
            .dispatch(request(
                &t,
                0,
                RequestKind::Trade {
                    offer: crate::game::ResourceBundle::single(Resource::Wood, 1),
                    want: crate::game::ResourceBundle::single(Resource::Ore, 1),
                    counterparty: None,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(GameError::InvalidTrade(_))));
    }

    #[test]
    fn test_player_left_keeps_turn_state() {
        let t = table(false, false);
        let mut rx = t.session.subscribe(t.players[1]).unwrap();
        t.session.subscribe(t.players[0]).unwrap();
        t.session.player_left(t.players[0]).unwrap();

        let snapshot = t.session.snapshot();
        assert_eq!(snapshot.game.current_seat, 0);
        assert!(snapshot.game.players[0].departed);
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert!(!t.session.unsubscribe(t.players[0]));
        assert!(matches!(
            drain(&mut rx)[0].event,
            Event::PlayerLeft { player } if player == t.players[0]
        ));

        t.session.player_left(t.players[1]).unwrap();
        assert_eq!(t.session.status(), SessionStatus::Abandoned);
    }

    #[test]
    fn test_expire_turn_advances() {
        let t = table(false, false);
        let events = t.session.expire_turn().unwrap();
        assert!(events.contains(&Event::TurnAdvanced {
            current: t.players[1],
            seat: 1
        }));
    }

    #[test]
    fn test_invariant_violation_quarantines_session() {
        let t = table(false, false);
        t.session
            .inner
            .write()
            .game
            .ledger
            .corrupt_for_test(0, Resource::Wheat);

        let err = t.session.dispatch(request(&t, 0, RequestKind::Roll)).unwrap_err();
        assert!(matches!(err, SessionError::NeedsRecovery(_)));
        assert_eq!(t.session.status(), SessionStatus::NeedsRecovery);

        let again = t.session.dispatch(request(&t, 0, RequestKind::EndTurn)).unwrap_err();
        assert!(matches!(again, SessionError::NeedsRecovery(_)));
    }

    #[tokio::test]
    async fn test_subscriber_receives_turn_advance() {
        let t = table(false, false);
        let mut rx = t.session.subscribe(t.players[1]).unwrap();
        t.session.dispatch(request(&t, 0, RequestKind::Roll)).unwrap();
        let phase = t.session.snapshot().game.phase;
        if phase == TurnPhase::MovingRobber {
            t.session.expire_turn().unwrap();
        } else {
            t.session.dispatch(request(&t, 0, RequestKind::EndTurn)).unwrap();
        }

        let mut saw_turn = false;
        while let Ok(note) = rx.try_recv() {
            if let Event::TurnAdvanced { seat, .. } = note.event {
                assert_eq!(seat, 1);
                saw_turn = true;
            }
        }
        assert!(saw_turn);
        drop(t);
        assert!(rx.recv().await.is_none());
    }
}
