pub mod blackjack;
pub mod cards;
pub mod crash;
pub mod fairness;
pub mod mines;
pub mod reaction;
pub mod types;

pub use blackjack::{BlackjackGame, BlackjackOutcome, BlackjackSnapshot};
pub use crash::{CrashEngine, CrashEvent, CrashPhase, CrashSnapshot};
pub use mines::{MinesBoard, MinesPhase, MinesSetup, MinesSnapshot, RevealOutcome};
pub use reaction::{Attempt, ReactionRound, ReactionSession};
pub use types::*;
