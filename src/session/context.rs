use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::game::state::GameConfig;
use crate::types::{LobbyId, UserId};

/// Answers whether an authenticated user may issue debug overrides.
pub trait IdentityResolver: Send + Sync {
    fn may_cheat(&self, user: UserId) -> bool;
}

/// Supplies the final player list when a lobby turns into a game.
pub trait RosterSupplier: Send + Sync {
    fn finalized_roster(&self, lobby: LobbyId) -> Option<Vec<UserId>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cheats_enabled: bool,
    pub game: GameConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cheats_enabled: false,
            game: GameConfig::default(),
        }
    }
}

/// Collaborators handed to every session at construction.
#[derive(Clone)]
pub struct SessionContext {
    pub identity: Arc<dyn IdentityResolver>,
    pub rosters: Arc<dyn RosterSupplier>,
}

impl SessionContext {
    pub fn new(identity: Arc<dyn IdentityResolver>, rosters: Arc<dyn RosterSupplier>) -> Self {
        Self { identity, rosters }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Arc::new(CheatAllowList::default()), Arc::new(StaticRosters::default()))
    }
}

/// Users allowed to cheat, fixed at construction.
#[derive(Debug, Default)]
pub struct CheatAllowList {
    users: HashSet<UserId>,
}

impl CheatAllowList {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

impl IdentityResolver for CheatAllowList {
    fn may_cheat(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }
}

/// In-memory lobby rosters.
#[derive(Debug, Default)]
pub struct StaticRosters {
    rosters: RwLock<HashMap<LobbyId, Vec<UserId>>>,
}

impl StaticRosters {
    pub fn finalize(&self, lobby: LobbyId, roster: Vec<UserId>) {
        self.rosters.write().insert(lobby, roster);
    }
}

impl RosterSupplier for StaticRosters {
    fn finalized_roster(&self, lobby: LobbyId) -> Option<Vec<UserId>> {
        self.rosters.read().get(&lobby).cloned()
    }
}
