use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::session::SessionError;
use crate::session::context::{SessionConfig, SessionContext};
use crate::session::coordinator::{SessionCoordinator, SessionStatus};
use crate::session::protocol::{Event, Request};
use crate::types::{LobbyId, SessionId, UserId};

/// All running sessions. The map lock is only held to find a session; the
/// dispatch itself runs under that session's own lock.
pub struct SessionRegistry {
    context: SessionContext,
    sessions: RwLock<HashMap<SessionId, Arc<SessionCoordinator>>>,
}

impl SessionRegistry {
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn start_session(
        &self,
        roster: Vec<UserId>,
        config: SessionConfig,
    ) -> Result<Arc<SessionCoordinator>, SessionError> {
        let distinct: HashSet<&UserId> = roster.iter().collect();
        if distinct.len() != roster.len() {
            return Err(SessionError::InvalidRoster(
                "a player appears twice".to_string(),
            ));
        }

        let id = SessionId::new();
        let session = SessionCoordinator::new(id, &roster, config, self.context.clone())
            .map_err(|err| SessionError::InvalidRoster(err.to_string()))?;
        let session = Arc::new(session);
        self.sessions.write().insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub fn start_from_lobby(
        &self,
        lobby: LobbyId,
        config: SessionConfig,
    ) -> Result<Arc<SessionCoordinator>, SessionError> {
        let roster = self
            .context
            .rosters
            .finalized_roster(lobby)
            .ok_or(SessionError::RosterUnavailable(lobby))?;
        info!(?lobby, players = roster.len(), "lobby roster finalized");
        self.start_session(roster, config)
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<SessionCoordinator>, SessionError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    pub fn dispatch(&self, request: Request) -> Result<Vec<Event>, SessionError> {
        let session = self.get(request.session)?;
        session.dispatch(request)
    }

    /// Drops finished and abandoned sessions, returning their ids.
    pub fn archive_finished(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write();
        let finished: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, session)| {
                matches!(
                    session.status(),
                    SessionStatus::GameOver | SessionStatus::Abandoned
                )
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            sessions.remove(id);
            info!(session = %id, "session archived");
        }
        finished
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::context::{CheatAllowList, StaticRosters};
    use crate::session::protocol::RequestKind;

    fn registry_with_lobby() -> (SessionRegistry, LobbyId, Vec<UserId>) {
        let rosters = Arc::new(StaticRosters::default());
        let lobby = LobbyId::new();
        let players = vec![UserId::new(), UserId::new(), UserId::new()];
        rosters.finalize(lobby, players.clone());
        let context = SessionContext::new(Arc::new(CheatAllowList::default()), rosters);
        (SessionRegistry::new(context), lobby, players)
    }

    #[test]
    fn test_start_from_lobby() {
        let (registry, lobby, players) = registry_with_lobby();
        let session = registry
            .start_from_lobby(lobby, SessionConfig::default())
            .unwrap();
        assert_eq!(registry.session_count(), 1);
        let snapshot = session.snapshot();
        let users: Vec<UserId> = snapshot.game.players.iter().map(|p| p.user).collect();
        assert_eq!(users, players);

        let missing = registry.start_from_lobby(LobbyId::new(), SessionConfig::default());
        assert!(matches!(missing, Err(SessionError::RosterUnavailable(_))));
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let (registry, _, players) = registry_with_lobby();
        let ghost = SessionId::new();
        let err = registry
            .dispatch(Request::new(ghost, players[0], RequestKind::Roll))
            .unwrap_err();
        assert_eq!(err, SessionError::NotFound(ghost));
    }

    #[test]
    fn test_invalid_rosters() {
        let (registry, _, _) = registry_with_lobby();
        let solo = registry.start_session(vec![UserId::new()], SessionConfig::default());
        assert!(matches!(solo, Err(SessionError::InvalidRoster(_))));
        let twin = UserId::new();
        let twins = registry.start_session(vec![twin, twin], SessionConfig::default());
        assert!(matches!(twins, Err(SessionError::InvalidRoster(_))));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_archive_abandoned_sessions() {
        let (registry, lobby, players) = registry_with_lobby();
        let session = registry
            .start_from_lobby(lobby, SessionConfig::default())
            .unwrap();
        let other = registry
            .start_session(vec![UserId::new(), UserId::new()], SessionConfig::default())
            .unwrap();
        for player in &players {
            session.player_left(*player).unwrap();
        }
        assert_eq!(registry.archive_finished(), vec![session.id()]);
        assert_eq!(registry.session_count(), 1);
        assert!(registry.get(other.id()).is_ok());
        assert!(registry.get(session.id()).is_err());
    }
}
