use crate::config::MinesConfig;
use crate::errors::{DuelError, SessionStateError, ValidationError};
use crate::games::types::{Multiplier, WagerLimits, MULTIPLIER_SCALE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const BOARD_CELLS: usize = 25;

/// Multiplier after `revealed` safe cells: `1 + revealed × 0.2 × (1 + mines/25)`
pub fn mines_multiplier(revealed: usize, mine_count: u8) -> Multiplier {
    let step = 80 * (BOARD_CELLS as u64 + mine_count as u64);
    Multiplier(MULTIPLIER_SCALE + revealed as u64 * step)
}

/// Uniformly chosen mine cells, without replacement
pub fn random_positions<R: Rng + ?Sized>(rng: &mut R, mine_count: u8) -> Vec<usize> {
    let mut cells = rand::seq::index::sample(rng, BOARD_CELLS, mine_count as usize).into_vec();
    cells.sort_unstable();
    cells
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MinesPhase {
    Active,
    Busted,
    CashedOut,
}

impl fmt::Display for MinesPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinesPhase::Active => write!(f, "active"),
            MinesPhase::Busted => write!(f, "busted"),
            MinesPhase::CashedOut => write!(f, "cashed_out"),
        }
    }
}

/// Bet and mine count chosen before the board exists
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinesSetup {
    pub bet: u64,
    pub mine_count: u8,
}

impl MinesSetup {
    pub fn validate(&self, limits: &WagerLimits, config: &MinesConfig) -> Result<(), ValidationError> {
        limits.check(self.bet)?;
        if self.mine_count < config.min_mines || self.mine_count > config.max_mines {
            return Err(ValidationError::MineCountOutOfRange {
                count: self.mine_count,
                min: config.min_mines,
                max: config.max_mines,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevealOutcome {
    Safe { multiplier: Multiplier },
    Mine { cell: usize },
    /// Last safe cell found; the board cashed itself out
    Cleared { multiplier: Multiplier, payout: u64 },
    /// Cell was already revealed; nothing changed
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinesSnapshot {
    pub bet: u64,
    pub mine_count: u8,
    pub phase: MinesPhase,
    pub revealed: Vec<usize>,
    /// Disclosed once the board is resolved
    pub mines: Option<Vec<usize>>,
    pub multiplier: Multiplier,
    pub payout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinesBoard {
    setup: MinesSetup,
    mines: BTreeSet<usize>,
    revealed: BTreeSet<usize>,
    phase: MinesPhase,
    payout: Option<u64>,
}

impl MinesBoard {
    /// Start a board with the given mine cells; positions stay fixed for the round
    pub fn start(
        setup: MinesSetup,
        positions: &[usize],
        limits: &WagerLimits,
        config: &MinesConfig,
    ) -> Result<Self, ValidationError> {
        setup.validate(limits, config)?;
        let mines: BTreeSet<usize> = positions.iter().copied().collect();
        if let Some(&bad) = mines.iter().find(|&&c| c >= BOARD_CELLS) {
            return Err(ValidationError::CellOutOfRange(bad));
        }
        if mines.len() != setup.mine_count as usize {
            return Err(ValidationError::ConfigMismatch(format!(
                "{} mine positions for {} mines",
                mines.len(),
                setup.mine_count
            )));
        }
        Ok(Self {
            setup,
            mines,
            revealed: BTreeSet::new(),
            phase: MinesPhase::Active,
            payout: None,
        })
    }

    pub fn phase(&self) -> MinesPhase {
        self.phase
    }

    pub fn bet(&self) -> u64 {
        self.setup.bet
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.len()
    }

    pub fn safe_cells(&self) -> usize {
        BOARD_CELLS - self.setup.mine_count as usize
    }

    pub fn multiplier(&self) -> Multiplier {
        mines_multiplier(self.revealed.len(), self.setup.mine_count)
    }

    /// Multiplier the next safe reveal would reach
    pub fn next_multiplier(&self) -> Multiplier {
        mines_multiplier(self.revealed.len() + 1, self.setup.mine_count)
    }

    pub fn is_revealed(&self, cell: usize) -> bool {
        self.revealed.contains(&cell)
    }

    pub fn reveal(&mut self, cell: usize) -> Result<RevealOutcome, DuelError> {
        if cell >= BOARD_CELLS {
            return Err(ValidationError::CellOutOfRange(cell).into());
        }
        if self.phase != MinesPhase::Active {
            return Err(SessionStateError::AlreadyResolved.into());
        }
        if self.revealed.contains(&cell) {
            return Ok(RevealOutcome::Unchanged);
        }

        if self.mines.contains(&cell) {
            self.phase = MinesPhase::Busted;
            self.payout = Some(0);
            return Ok(RevealOutcome::Mine { cell });
        }

        self.revealed.insert(cell);
        let multiplier = self.multiplier();
        if self.revealed.len() == self.safe_cells() {
            let payout = self.settle();
            return Ok(RevealOutcome::Cleared { multiplier, payout });
        }
        Ok(RevealOutcome::Safe { multiplier })
    }

    /// Take the current multiplier; at least one safe cell must be revealed
    pub fn cashout(&mut self) -> Result<u64, SessionStateError> {
        if self.phase != MinesPhase::Active {
            return Err(SessionStateError::AlreadyResolved);
        }
        if self.revealed.is_empty() {
            return Err(SessionStateError::NothingToCashOut);
        }
        Ok(self.settle())
    }

    fn settle(&mut self) -> u64 {
        let payout = self.multiplier().payout(self.setup.bet);
        self.phase = MinesPhase::CashedOut;
        self.payout = Some(payout);
        payout
    }

    pub fn snapshot(&self) -> MinesSnapshot {
        let resolved = self.phase != MinesPhase::Active;
        MinesSnapshot {
            bet: self.setup.bet,
            mine_count: self.setup.mine_count,
            phase: self.phase,
            revealed: self.revealed.iter().copied().collect(),
            mines: resolved.then(|| self.mines.iter().copied().collect()),
            multiplier: self.multiplier(),
            payout: self.payout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn board(bet: u64, mines: &[usize]) -> MinesBoard {
        let setup = MinesSetup { bet, mine_count: mines.len() as u8 };
        MinesBoard::start(setup, mines, &WagerLimits::default(), &MinesConfig::default()).unwrap()
    }

    #[test]
    fn test_ten_reveals_with_five_mines() {
        let mut b = board(100, &[0, 1, 2, 3, 4]);
        for cell in 5..15 {
            b.reveal(cell).unwrap();
        }
        assert_eq!(b.multiplier(), Multiplier(34_000));
        assert_eq!(b.cashout().unwrap(), 340);
        assert_eq!(b.phase(), MinesPhase::CashedOut);
    }

    #[test]
    fn test_multiplier_strictly_increasing() {
        for mines in 1..=24u8 {
            let mut last = mines_multiplier(0, mines);
            for revealed in 1..=(25 - mines as usize) {
                let next = mines_multiplier(revealed, mines);
                assert!(next > last);
                last = next;
            }
        }
    }

    #[test]
    fn test_mine_hit_pays_nothing_and_locks() {
        let mut b = board(100, &[7]);
        b.reveal(0).unwrap();
        assert_eq!(b.reveal(7).unwrap(), RevealOutcome::Mine { cell: 7 });
        assert_eq!(b.phase(), MinesPhase::Busted);
        assert_eq!(b.snapshot().payout, Some(0));
        assert_eq!(b.snapshot().mines, Some(vec![7]));
        assert!(b.reveal(1).is_err());
        assert!(b.cashout().is_err());
    }

    #[test]
    fn test_double_reveal_is_noop() {
        let mut b = board(100, &[24]);
        b.reveal(3).unwrap();
        let before = b.snapshot();
        assert_eq!(b.reveal(3).unwrap(), RevealOutcome::Unchanged);
        assert_eq!(b.snapshot(), before);
    }

    #[test]
    fn test_clearing_board_auto_cashes_out() {
        let mines: Vec<usize> = (1..25).collect();
        let mut b = board(10, &mines);
        let outcome = b.reveal(0).unwrap();
        let expected = mines_multiplier(1, 24);
        assert_eq!(outcome, RevealOutcome::Cleared { multiplier: expected, payout: expected.payout(10) });
        assert_eq!(b.phase(), MinesPhase::CashedOut);
    }

    #[test]
    fn test_cashout_without_reveals_rejected() {
        let mut b = board(100, &[0]);
        assert_eq!(b.cashout(), Err(SessionStateError::NothingToCashOut));
        assert_eq!(b.phase(), MinesPhase::Active);
    }

    #[test]
    fn test_setup_validation() {
        let limits = WagerLimits::default();
        let config = MinesConfig::default();
        assert!(MinesSetup { bet: 5, mine_count: 3 }.validate(&limits, &config).is_err());
        assert!(MinesSetup { bet: 100, mine_count: 0 }.validate(&limits, &config).is_err());
        assert!(MinesSetup { bet: 100, mine_count: 25 }.validate(&limits, &config).is_err());
        assert!(MinesSetup { bet: 100, mine_count: 24 }.validate(&limits, &config).is_ok());
        assert!(matches!(
            board(100, &[1]).reveal(25),
            Err(DuelError::Validation(ValidationError::CellOutOfRange(25)))
        ));
    }

    #[test]
    fn test_random_positions_are_distinct() {
        let mut rng = StdRng::seed_from_u64(3);
        let cells = random_positions(&mut rng, 24);
        let unique: BTreeSet<_> = cells.iter().collect();
        assert_eq!(unique.len(), 24);
        assert!(cells.iter().all(|&c| c < BOARD_CELLS));
    }
}
