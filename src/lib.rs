#![warn(clippy::all)]
#![deny(rust_2018_idioms)]

pub mod board;
pub mod cheat;
pub mod coords;
pub mod game;
pub mod session;
pub mod types;

pub use board::{Board, MapType};
pub use game::{GameConfig, GameState};
pub use session::{SessionCoordinator, SessionError, SessionRegistry};
pub use types::{Color, LobbyId, SessionId, UserId};
