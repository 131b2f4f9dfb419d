pub mod context;
pub mod coordinator;
pub mod protocol;
pub mod registry;

pub use context::{
    CheatAllowList, IdentityResolver, RosterSupplier, SessionConfig, SessionContext,
    StaticRosters,
};
pub use coordinator::{SessionCoordinator, SessionSnapshot, SessionStatus};
pub use protocol::{BuildTarget, Event, Notification, Request, RequestKind};
pub use registry::SessionRegistry;

use crate::game::state::GameError;
use crate::types::{LobbyId, SessionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("{user} is not playing in session {session}")]
    NotInSession { session: SessionId, user: UserId },
    #[error("session {0} needs manual recovery")]
    NeedsRecovery(SessionId),
    #[error("no finalized roster for lobby {0:?}")]
    RosterUnavailable(LobbyId),
    #[error("invalid roster: {0}")]
    InvalidRoster(String),
    #[error("action rejected: {0}")]
    Rejected(GameError),
}
