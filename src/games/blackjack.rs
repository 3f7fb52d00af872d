//! Single-hand blackjack against a dealer who stands on 17.
//!
//! Deal order is player, dealer up card, player, dealer hole card. The hole
//! card stays hidden until the player stands or holds a natural.

use crate::config::BlackjackConfig;
use crate::errors::{DuelError, SessionStateError};
use crate::games::cards::{hand_value, is_natural, Card, Deck};
use crate::games::types::{Multiplier, WagerLimits};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlackjackOutcome {
    Bust,
    Blackjack,
    DealerBust,
    Win,
    Lose,
    Push,
}

impl BlackjackOutcome {
    pub fn multiplier(&self, config: &BlackjackConfig) -> Multiplier {
        match self {
            BlackjackOutcome::Blackjack => Multiplier(config.natural_payout_bps),
            BlackjackOutcome::DealerBust | BlackjackOutcome::Win => Multiplier(config.win_payout_bps),
            BlackjackOutcome::Push => Multiplier::ONE,
            BlackjackOutcome::Bust | BlackjackOutcome::Lose => Multiplier(0),
        }
    }
}

impl fmt::Display for BlackjackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BlackjackOutcome::Bust => "BUST",
            BlackjackOutcome::Blackjack => "BLACKJACK",
            BlackjackOutcome::DealerBust => "DEALER BUST",
            BlackjackOutcome::Win => "WIN",
            BlackjackOutcome::Lose => "LOSE",
            BlackjackOutcome::Push => "PUSH",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackjackSnapshot {
    pub bet: u64,
    pub player: Vec<Card>,
    /// Hole card omitted while hidden
    pub dealer: Vec<Card>,
    pub player_value: u8,
    pub dealer_value: u8,
    pub hole_hidden: bool,
    pub outcome: Option<BlackjackOutcome>,
    pub payout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BlackjackGame {
    config: BlackjackConfig,
    bet: u64,
    deck: Deck,
    player: Vec<Card>,
    dealer: Vec<Card>,
    hole_hidden: bool,
    outcome: Option<BlackjackOutcome>,
}

impl BlackjackGame {
    /// Validate the bet and deal the opening four cards
    pub fn deal(
        bet: u64,
        mut deck: Deck,
        limits: &WagerLimits,
        config: BlackjackConfig,
    ) -> Result<Self, DuelError> {
        limits.check(bet)?;

        let mut opening = [None; 4];
        for slot in opening.iter_mut() {
            *slot = deck.draw();
        }
        let [Some(p1), Some(d1), Some(p2), Some(d2)] = opening else {
            return Err(SessionStateError::DeckExhausted.into());
        };

        let mut game = Self {
            config,
            bet,
            deck,
            player: vec![p1, p2],
            dealer: vec![d1, d2],
            hole_hidden: true,
            outcome: None,
        };

        if is_natural(&game.player) {
            game.hole_hidden = false;
            let outcome = if hand_value(&game.dealer) == 21 {
                BlackjackOutcome::Push
            } else {
                BlackjackOutcome::Blackjack
            };
            game.outcome = Some(outcome);
        }
        Ok(game)
    }

    pub fn bet(&self) -> u64 {
        self.bet
    }

    pub fn outcome(&self) -> Option<BlackjackOutcome> {
        self.outcome
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn player_value(&self) -> u8 {
        hand_value(&self.player)
    }

    /// Dealer total counting only the cards the player can see
    pub fn dealer_visible_value(&self) -> u8 {
        if self.hole_hidden {
            hand_value(&self.dealer[..1])
        } else {
            hand_value(&self.dealer)
        }
    }

    /// `floor(bet × outcome multiplier)` once resolved
    pub fn payout(&self) -> Option<u64> {
        self.outcome
            .map(|o| o.multiplier(&self.config).payout(self.bet))
    }

    pub fn hit(&mut self) -> Result<Card, SessionStateError> {
        self.ensure_active()?;
        let card = self.deck.draw().ok_or(SessionStateError::DeckExhausted)?;
        self.player.push(card);
        if self.player_value() > 21 {
            self.outcome = Some(BlackjackOutcome::Bust);
        }
        Ok(card)
    }

    /// Reveal the hole card, play out the dealer and resolve
    pub fn stand(&mut self) -> Result<BlackjackOutcome, SessionStateError> {
        self.ensure_active()?;
        self.hole_hidden = false;
        while hand_value(&self.dealer) < self.config.dealer_stands_on {
            let card = self.deck.draw().ok_or(SessionStateError::DeckExhausted)?;
            self.dealer.push(card);
        }

        let player = self.player_value();
        let dealer = hand_value(&self.dealer);
        let outcome = if dealer > 21 {
            BlackjackOutcome::DealerBust
        } else if player > dealer {
            BlackjackOutcome::Win
        } else if player == dealer {
            BlackjackOutcome::Push
        } else {
            BlackjackOutcome::Lose
        };
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    fn ensure_active(&self) -> Result<(), SessionStateError> {
        if self.outcome.is_some() {
            return Err(SessionStateError::AlreadyResolved);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> BlackjackSnapshot {
        let dealer = if self.hole_hidden {
            self.dealer[..1].to_vec()
        } else {
            self.dealer.clone()
        };
        BlackjackSnapshot {
            bet: self.bet,
            player: self.player.clone(),
            dealer,
            player_value: self.player_value(),
            dealer_value: self.dealer_visible_value(),
            hole_hidden: self.hole_hidden,
            outcome: self.outcome,
            payout: self.payout(),
        }
    }
}
