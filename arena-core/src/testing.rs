//! Testing utilities for the arena engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedRandom` for exact, repeatable dice
//! - `MockNarrator` and `MockIllustrator` for deterministic collaborators
//! - `TestHarness` for driving a battle already in combat
//! - Assertion helpers for verifying battle state

use crate::arena::{Arena, ArenaConfig, RoundReport};
use crate::battle::{Battle, BattleId, ChannelId, Phase, Side, ThreadId, UserId};
use crate::crowd::{CrowdOutcome, SpectatorAction};
use crate::fighter::{Combatant, Stance, Stats, StoryData};
use crate::narrative::{Illustrator, NarrativeError, Narrator, OutcomeSummary, RoundSummary};
use crate::rng::RandomSource;
use crate::state::BattleError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Red fighter's user id in [`TestHarness`].
pub const RED_USER: UserId = UserId(1);
/// Blue fighter's user id in [`TestHarness`].
pub const BLUE_USER: UserId = UserId(2);

// ============================================================================
// Randomness
// ============================================================================

/// A [`RandomSource`] that replays a fixed list of draws, cycling when it
/// runs out.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    values: Vec<f64>,
    index: usize,
}

impl ScriptedRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, index: 0 }
    }

    /// Number of values drawn so far.
    pub fn draws(&self) -> usize {
        self.index
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.index % self.values.len()];
        self.index += 1;
        value.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockMode {
    Scripted,
    Failing,
    Stalled,
}

/// A narrator that returns scripted text, always fails, or never answers.
pub struct MockNarrator {
    mode: MockMode,
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl MockNarrator {
    /// Return the given responses in order, then fail.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            mode: MockMode::Scripted,
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every request.
    pub fn failing() -> Self {
        Self {
            mode: MockMode::Failing,
            ..Self::new(Vec::new())
        }
    }

    /// Never complete a request.
    pub fn stalled() -> Self {
        Self {
            mode: MockMode::Stalled,
            ..Self::new(Vec::new())
        }
    }

    /// Number of narration requests received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<String, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MockMode::Failing => Err(NarrativeError::Network("mock narrator offline".to_string())),
            MockMode::Stalled => std::future::pending().await,
            MockMode::Scripted => self
                .responses
                .lock()
                .await
                .pop_front()
                .ok_or(NarrativeError::Empty),
        }
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    async fn narrate_round(&self, _summary: &RoundSummary) -> Result<String, NarrativeError> {
        self.next().await
    }

    async fn narrate_outcome(&self, _outcome: &OutcomeSummary) -> Result<String, NarrativeError> {
        self.next().await
    }
}

/// An illustrator that returns fixed image bytes or fails.
pub struct MockIllustrator {
    image: Option<Vec<u8>>,
    prompts: Mutex<Vec<String>>,
    references: Mutex<Vec<Vec<String>>>,
}

impl MockIllustrator {
    pub fn new(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: Some(image.into()),
            prompts: Mutex::new(Vec::new()),
            references: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            image: None,
            prompts: Mutex::new(Vec::new()),
            references: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    /// Reference images received with each prompt.
    pub async fn references(&self) -> Vec<Vec<String>> {
        self.references.lock().await.clone()
    }
}

#[async_trait]
impl Illustrator for MockIllustrator {
    async fn illustrate(
        &self,
        prompt: &str,
        references: &[String],
    ) -> Result<Option<Vec<u8>>, NarrativeError> {
        self.prompts.lock().await.push(prompt.to_string());
        self.references.lock().await.push(references.to_vec());
        match &self.image {
            Some(bytes) => Ok(Some(bytes.clone())),
            None => Err(NarrativeError::Api {
                status: 503,
                message: "mock illustrator offline".to_string(),
            }),
        }
    }
}

// ============================================================================
// Sample Combatants
// ============================================================================

/// A balanced combatant with the built-in abilities.
pub fn sample_combatant(name: &str) -> Arc<Combatant> {
    Arc::new(Combatant::new(name, Stats::new(60, 50, 55, 50, 30)))
}

/// A combatant with story abilities, which deal magical damage.
pub fn sample_mage(name: &str) -> Arc<Combatant> {
    let story = StoryData {
        faction: Some("Ember Circle".to_string()),
        description: Some("A duelist who fights with living flame".to_string()),
        abilities: vec!["Flame Lash".to_string(), "Cinder Ward".to_string()],
        image: Some(format!("portraits/{}.png", name.to_lowercase())),
    };
    Arc::new(Combatant::new(name, Stats::new(30, 80, 50, 40, 40)).with_story(story))
}

/// A combatant built from explicit stats.
pub fn combatant_with_stats(name: &str, stats: Stats) -> Arc<Combatant> {
    Arc::new(Combatant::new(name, stats))
}

// ============================================================================
// Test Harness
// ============================================================================

/// An arena with one battle already in combat between [`RED_USER`] and
/// [`BLUE_USER`].
pub struct TestHarness {
    pub arena: Arena,
    pub battle_id: BattleId,
    pub rng: ScriptedRandom,
}

impl TestHarness {
    /// Start a battle between two sample combatants with the given stances.
    pub fn new(red_stance: Stance, blue_stance: Stance) -> Result<Self, BattleError> {
        Self::with_combatants(
            ArenaConfig::default(),
            sample_combatant("Red Bot"),
            sample_combatant("Blue Bot"),
            red_stance,
            blue_stance,
        )
    }

    /// Start a battle with custom config and combatants.
    pub fn with_combatants(
        config: ArenaConfig,
        red: Arc<Combatant>,
        blue: Arc<Combatant>,
        red_stance: Stance,
        blue_stance: Stance,
    ) -> Result<Self, BattleError> {
        let mut arena = Arena::new(config);
        let battle_id = arena.challenge(ChannelId(1), RED_USER, "Red", red)?;
        arena.accept(battle_id, BLUE_USER, "Blue", blue)?;
        arena.attach_thread(battle_id, ThreadId(1))?;
        arena.set_stance(battle_id, RED_USER, red_stance)?;
        arena.set_stance(battle_id, BLUE_USER, blue_stance)?;
        Ok(Self {
            arena,
            battle_id,
            rng: ScriptedRandom::new(vec![0.5]),
        })
    }

    /// Replace the scripted draws.
    pub fn script(&mut self, values: Vec<f64>) -> &mut Self {
        self.rng = ScriptedRandom::new(values);
        self
    }

    /// Set both actions and resolve the round.
    pub fn play_round(
        &mut self,
        red_action: &str,
        blue_action: &str,
    ) -> Result<RoundReport, BattleError> {
        self.arena.set_action(self.battle_id, RED_USER, red_action)?;
        self.arena.set_action(self.battle_id, BLUE_USER, blue_action)?;
        self.arena.resolve_round(self.battle_id, &mut self.rng)
    }

    /// Add an admitted spectator.
    pub fn add_spectator(&mut self, user: UserId) -> Result<(), BattleError> {
        self.arena.join_spectators(self.battle_id, user)
    }

    /// Apply a spectator action with the harness dice.
    pub fn crowd(
        &mut self,
        user: UserId,
        action: SpectatorAction,
    ) -> Result<CrowdOutcome, BattleError> {
        self.arena.spectator_action(self.battle_id, user, action, &mut self.rng)
    }

    pub fn battle(&self) -> Option<&Battle> {
        self.arena.battle(self.battle_id)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.battle().map(|b| b.phase())
    }

    /// Current HP of a side.
    pub fn hp(&self, side: Side) -> Option<i32> {
        self.battle().and_then(|b| b.fighter(side)).map(|f| f.hp())
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the battle is in the given phase.
#[track_caller]
pub fn assert_phase(battle: &Battle, phase: Phase) {
    assert_eq!(
        battle.phase(),
        phase,
        "Expected phase {phase}, got {}",
        battle.phase()
    );
}

/// Assert a side's HP.
#[track_caller]
pub fn assert_hp(battle: &Battle, side: Side, hp: i32) {
    let actual = battle.fighter(side).map(|f| f.hp());
    assert_eq!(actual, Some(hp), "Expected {side} HP {hp}, got {actual:?}");
}

/// Assert HP stays within `0..=max_hp` for every present fighter.
#[track_caller]
pub fn assert_hp_in_bounds(battle: &Battle) {
    for side in [Side::Red, Side::Blue] {
        if let Some(fighter) = battle.fighter(side) {
            assert!(
                (0..=fighter.max_hp()).contains(&fighter.hp()),
                "{side} HP {} outside 0..={}",
                fighter.hp(),
                fighter.max_hp()
            );
        }
    }
}

/// Assert crowd energy stays within `0..=100`.
#[track_caller]
pub fn assert_energy_in_bounds(battle: &Battle) {
    assert!(
        battle.crowd_energy() <= crate::crowd::MAX_CROWD_ENERGY,
        "Crowd energy {} above maximum",
        battle.crowd_energy()
    );
}

/// Assert a result failed with the given error.
#[track_caller]
pub fn assert_rejected<T: std::fmt::Debug>(result: Result<T, BattleError>, expected: BattleError) {
    match result {
        Err(e) => assert_eq!(e, expected),
        Ok(v) => panic!("Expected {expected:?}, got Ok({v:?})"),
    }
}
