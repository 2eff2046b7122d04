//! Headless duel runner for programmatic use.
//!
//! Plays a complete battle between two auto-piloted combatants with a
//! seeded generator and an optional simulated crowd. It's designed for:
//! - Balance simulations over many seeds
//! - End-to-end tests of the whole engine
//!
//! # Example
//!
//! ```ignore
//! use arena_core::headless::{HeadlessConfig, HeadlessDuel};
//!
//! let config = HeadlessConfig::quick_start(42).with_crowd(6);
//! let outcome = HeadlessDuel::new(config)?.run()?;
//! println!("{} won after {} rounds", outcome.winner, outcome.rounds);
//! ```

use crate::arena::{Arena, ArenaConfig, RoundReport};
use crate::battle::{Battle, BattleId, ChannelId, Side, ThreadId, UserId};
use crate::crowd::SpectatorAction;
use crate::fighter::{Combatant, Stance};
use crate::rng::{RandomSource, RngSource};
use crate::state::BattleError;
use crate::testing::sample_combatant;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::debug;

const RED_USER: UserId = UserId(1);
const BLUE_USER: UserId = UserId(2);
const FIRST_SPECTATOR: u64 = 1000;

/// Configuration for a headless duel.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub red: Arc<Combatant>,
    pub blue: Arc<Combatant>,
    /// Seed for every random decision in the duel.
    pub seed: u64,
    /// Simulated spectators; each acts once per round.
    pub crowd_size: u32,
    pub arena: ArenaConfig,
}

impl HeadlessConfig {
    /// Two sample combatants, no crowd, default arena settings.
    pub fn quick_start(seed: u64) -> Self {
        Self {
            red: sample_combatant("Red Bot"),
            blue: sample_combatant("Blue Bot"),
            seed,
            crowd_size: 0,
            arena: ArenaConfig::default(),
        }
    }

    /// Use custom combatants.
    pub fn with_combatants(mut self, red: Arc<Combatant>, blue: Arc<Combatant>) -> Self {
        self.red = red;
        self.blue = blue;
        self
    }

    /// Simulate a crowd of the given size.
    pub fn with_crowd(mut self, size: u32) -> Self {
        self.crowd_size = size;
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.arena = self.arena.with_max_rounds(rounds);
        self
    }
}

/// One line of the duel transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub round: u32,
    pub text: String,
}

/// Final result of a headless duel.
#[derive(Debug, Clone, PartialEq)]
pub struct DuelOutcome {
    pub winner: Side,
    pub rounds: u32,
    pub epic: bool,
    pub red_hp: i32,
    pub blue_hp: i32,
    pub red_crits: usize,
    pub blue_crits: usize,
    pub arena_events: usize,
}

/// A battle that plays itself.
pub struct HeadlessDuel {
    arena: Arena,
    battle_id: BattleId,
    rng: RngSource<StdRng>,
    spectators: Vec<UserId>,
    transcript: Vec<TranscriptEntry>,
    arena_events: usize,
}

impl HeadlessDuel {
    /// Create the battle and carry it into combat with random stances.
    pub fn new(config: HeadlessConfig) -> Result<Self, BattleError> {
        let mut arena = Arena::new(config.arena);
        let mut rng = RngSource::seeded(config.seed);

        let battle_id = arena.challenge(ChannelId(0), RED_USER, "Red", config.red)?;
        let spectators: Vec<UserId> = (0..config.crowd_size as u64)
            .map(|i| UserId(FIRST_SPECTATOR + i))
            .collect();
        for user in &spectators {
            arena.join_spectators(battle_id, *user)?;
        }
        arena.accept(battle_id, BLUE_USER, "Blue", config.blue)?;
        arena.attach_thread(battle_id, ThreadId(config.seed))?;

        let stances = Stance::all();
        for user in [RED_USER, BLUE_USER] {
            let stance = stances[rng.index(stances.len())];
            arena.set_stance(battle_id, user, stance)?;
        }

        Ok(Self {
            arena,
            battle_id,
            rng,
            spectators,
            transcript: Vec::new(),
            arena_events: 0,
        })
    }

    pub fn battle(&self) -> Option<&Battle> {
        self.arena.battle(self.battle_id)
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    fn current_round(&self) -> u32 {
        self.battle().map(|b| b.round()).unwrap_or(0)
    }

    fn random_action(&mut self) -> SpectatorAction {
        match self.rng.index(4) {
            0 => SpectatorAction::CheerRed,
            1 => SpectatorAction::CheerBlue,
            2 => SpectatorAction::Bloodlust,
            _ => SpectatorAction::Surge,
        }
    }

    /// Let the crowd act, pick random abilities and resolve one round.
    pub fn play_round(&mut self) -> Result<RoundReport, BattleError> {
        let round = self.current_round();
        for user in self.spectators.clone() {
            let action = self.random_action();
            let outcome = self
                .arena
                .spectator_action(self.battle_id, user, action, &mut self.rng)?;
            if let Some(event) = outcome.event {
                self.arena_events += 1;
                self.transcript.push(TranscriptEntry {
                    round,
                    text: event.describe(),
                });
            }
        }

        self.arena.fill_missing_actions(self.battle_id, &mut self.rng)?;
        let report = self.arena.resolve_round(self.battle_id, &mut self.rng)?;
        debug!(round = report.result.round, phase = %report.phase, "headless round");
        self.transcript.push(TranscriptEntry {
            round: report.result.round,
            text: report.fallback_narrative(),
        });
        Ok(report)
    }

    /// Play until the battle finishes.
    pub fn run(&mut self) -> Result<DuelOutcome, BattleError> {
        loop {
            let report = self.play_round()?;
            if let Some(winner) = report.winner {
                let battle = self.battle().ok_or(BattleError::NotFound)?;
                let (red, blue) = battle.duel().ok_or(BattleError::NoOpponent)?;
                return Ok(DuelOutcome {
                    winner,
                    rounds: report.result.round,
                    epic: report.epic,
                    red_hp: red.hp(),
                    blue_hp: blue.hp(),
                    red_crits: battle.critical_hits(Side::Red),
                    blue_crits: battle.critical_hits(Side::Blue),
                    arena_events: self.arena_events,
                });
            }
        }
    }
}
