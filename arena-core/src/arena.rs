//! Arena - the high-level API the chat command layer calls.
//!
//! Wraps the registry, state machine, resolver and crowd engine behind
//! id-based operations. Every game-rule failure comes back as a
//! [`BattleError`] whose message can be shown to the user as-is.

use crate::battle::{
    Battle, BattleId, ChannelId, MessageId, Phase, PhaseTimeouts, RoundResult, Side, ThreadId,
    UserId,
};
use crate::combat::resolve;
use crate::crowd::{self, CrowdOutcome, SpectatorAction};
use crate::fighter::{Combatant, Fighter, Stance};
use crate::narrative::{
    fallback_outcome_narrative, fallback_round_narrative, illustration_prompt,
    narrate_outcome_or_fallback, narrate_round_or_fallback, should_illustrate,
    spawn_round_narrative, Illustrator, Narrator, NarratorConfig, OutcomeSummary, RoundSummary,
};
use crate::persist::SavedArena;
use crate::registry::BattleRegistry;
use crate::rng::RandomSource;
use crate::state::{self, is_epic_victory, winner, BattleError};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for an arena.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Rounds before a battle is decided on points.
    pub max_rounds: u32,

    /// Per-phase timeouts.
    pub timeouts: PhaseTimeouts,

    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,

    /// Settings for the Claude narrator.
    pub narrator: NarratorConfig,
}

impl ArenaConfig {
    pub fn new() -> Self {
        Self {
            max_rounds: 5,
            timeouts: PhaseTimeouts::default(),
            sweep_interval: Duration::from_secs(30),
            narrator: NarratorConfig::default(),
        }
    }

    /// Set the number of rounds per battle.
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Set the phase timeouts.
    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the expiry sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the narrator configuration.
    pub fn with_narrator(mut self, narrator: NarratorConfig) -> Self {
        self.narrator = narrator;
        self
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened when a round resolved.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub battle_id: BattleId,

    /// The round as appended to the log.
    pub result: RoundResult,

    /// Phase after resolution.
    pub phase: Phase,

    /// Set once the battle has finished.
    pub winner: Option<Side>,

    pub epic: bool,

    /// Input for the narrator.
    pub summary: RoundSummary,

    /// Set once the battle has finished.
    pub outcome: Option<OutcomeSummary>,
}

impl RoundReport {
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Deterministic narrative built from the committed round.
    pub fn fallback_narrative(&self) -> String {
        fallback_round_narrative(&self.summary)
    }
}

/// An arena hosting any number of concurrent battles.
pub struct Arena {
    config: ArenaConfig,
    registry: BattleRegistry,
    narrator: Option<Arc<dyn Narrator>>,
    illustrator: Option<Arc<dyn Illustrator>>,
}

impl Arena {
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            registry: BattleRegistry::new(),
            narrator: None,
            illustrator: None,
        }
    }

    /// Attach a narrator for round and outcome prose.
    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Attach an illustrator for highlight images.
    pub fn with_illustrator(mut self, illustrator: Arc<dyn Illustrator>) -> Self {
        self.illustrator = Some(illustrator);
        self
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn registry(&self) -> &BattleRegistry {
        &self.registry
    }

    pub fn narrator(&self) -> Option<Arc<dyn Narrator>> {
        self.narrator.clone()
    }

    fn battle_mut(&mut self, id: BattleId) -> Result<&mut Battle, BattleError> {
        self.registry.get_mut(id).ok_or(BattleError::NotFound)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Current state of a battle, for display.
    pub fn battle(&self, id: BattleId) -> Option<&Battle> {
        self.registry.lookup_by_id(id)
    }

    pub fn battle_for_user(&self, user: UserId) -> Option<&Battle> {
        self.registry.lookup_by_user(user)
    }

    pub fn battle_for_thread(&self, thread: ThreadId) -> Option<&Battle> {
        self.registry.lookup_by_thread(thread)
    }

    pub fn is_user_busy(&self, user: UserId) -> bool {
        self.registry.is_user_busy(user)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a challenge in a channel.
    pub fn challenge(
        &mut self,
        channel: ChannelId,
        user: UserId,
        display_name: impl Into<String>,
        combatant: Arc<Combatant>,
    ) -> Result<BattleId, BattleError> {
        if self.registry.is_user_busy(user) {
            return Err(BattleError::UserBusy);
        }
        let fighter = Fighter::new(user, display_name, combatant);
        let battle = self.registry.create(
            channel,
            fighter,
            self.config.max_rounds,
            self.config.timeouts,
            Utc::now(),
        );
        Ok(battle.id)
    }

    /// Record the announcement message for a challenge.
    pub fn set_announcement(
        &mut self,
        id: BattleId,
        message: MessageId,
    ) -> Result<(), BattleError> {
        self.battle_mut(id)?.announcement_id = Some(message);
        Ok(())
    }

    /// Accept a challenge as the blue fighter.
    pub fn accept(
        &mut self,
        id: BattleId,
        user: UserId,
        display_name: impl Into<String>,
        combatant: Arc<Combatant>,
    ) -> Result<(), BattleError> {
        let battle = self.registry.lookup_by_id(id).ok_or(BattleError::NotFound)?;
        if battle.red().user_id == user {
            return Err(BattleError::SelfChallenge);
        }
        if self.registry.is_user_busy(user) {
            return Err(BattleError::UserBusy);
        }

        let fighter = Fighter::new(user, display_name, combatant);
        state::accept_challenge(self.battle_mut(id)?, fighter, Utc::now())?;
        self.registry.index_user(id, user)
    }

    /// Choose a stance. Returns true if this started combat.
    pub fn set_stance(
        &mut self,
        id: BattleId,
        user: UserId,
        stance: Stance,
    ) -> Result<bool, BattleError> {
        state::set_stance(self.battle_mut(id)?, user, stance, Utc::now())
    }

    /// Choose an ability for this round. Returns true once both sides are
    /// ready to resolve.
    pub fn set_action(
        &mut self,
        id: BattleId,
        user: UserId,
        ability: &str,
    ) -> Result<bool, BattleError> {
        let battle = self.battle_mut(id)?;
        state::set_action(battle, user, ability)?;
        Ok(battle.both_actions_ready())
    }

    /// Pick a random available ability for every side that has not chosen.
    ///
    /// Returns the sides that were filled in with their ability.
    pub fn fill_missing_actions(
        &mut self,
        id: BattleId,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<(Side, String)>, BattleError> {
        let battle = self.battle_mut(id)?;
        let (red, blue) = battle.duel().ok_or(BattleError::NoOpponent)?;

        let mut choices = Vec::new();
        for fighter in [red, blue] {
            if fighter.action().is_some() {
                continue;
            }
            let abilities = fighter.abilities();
            let pick = abilities[rng.index(abilities.len())].name.clone();
            choices.push((fighter.user_id, pick));
        }

        let mut filled = Vec::with_capacity(choices.len());
        for (user, ability) in choices {
            let side = state::set_action(battle, user, &ability)?;
            filled.push((side, ability));
        }
        Ok(filled)
    }

    /// Resolve the current round once both actions are in.
    ///
    /// The combat math is committed before this returns; narrative is
    /// requested separately via [`narrate_round`](Self::narrate_round).
    pub fn resolve_round(
        &mut self,
        id: BattleId,
        rng: &mut dyn RandomSource,
    ) -> Result<RoundReport, BattleError> {
        let battle = self.battle_mut(id)?;
        if battle.phase() != Phase::Combat {
            return Err(BattleError::IllegalPhase {
                operation: "resolve a round",
                phase: battle.phase(),
            });
        }
        if !battle.both_actions_ready() {
            return Err(BattleError::ActionsPending);
        }

        let bonus = crowd::crowd_bonus(battle);
        let resolution = {
            let (red, blue) = battle.duel().ok_or(BattleError::NoOpponent)?;
            resolve(red, blue, bonus, rng)
        };
        let result = state::resolve_round(battle, &resolution, Utc::now())?;

        let summary = RoundSummary::from_battle(battle, &result).ok_or(BattleError::NoOpponent)?;
        let outcome = OutcomeSummary::from_battle(battle);
        let report = RoundReport {
            battle_id: id,
            phase: battle.phase(),
            winner: winner(battle),
            epic: is_epic_victory(battle),
            result,
            summary,
            outcome,
        };
        if let Some(side) = report.winner {
            info!(battle_id = %id, winner = %side, epic = report.epic, "battle decided");
        }
        Ok(report)
    }

    /// Concede. Returns the winning side, or `None` for an unanswered
    /// challenge, which is withdrawn instead.
    pub fn forfeit(&mut self, id: BattleId, user: UserId) -> Result<Option<Side>, BattleError> {
        let battle = self.battle_mut(id)?;
        let side = state::forfeit(battle, user)?;
        if battle.phase() == Phase::Challenge {
            self.registry.remove(id);
            return Ok(None);
        }
        Ok(Some(side.opposite()))
    }

    /// Withdraw an unanswered challenge.
    pub fn cancel(&mut self, id: BattleId, user: UserId) -> Result<(), BattleError> {
        self.registry.cancel_challenge(id, user).map(|_| ())
    }

    /// Remove a finished battle from the registry.
    pub fn cleanup(&mut self, id: BattleId) -> Result<Battle, BattleError> {
        let battle = self.registry.lookup_by_id(id).ok_or(BattleError::NotFound)?;
        if !battle.is_finished() {
            return Err(BattleError::IllegalPhase {
                operation: "clean up a battle",
                phase: battle.phase(),
            });
        }
        self.registry.remove(id).ok_or(BattleError::NotFound)
    }

    /// Evict expired battles. Returns the evicted battles.
    pub fn sweep(&mut self, now: chrono::DateTime<Utc>) -> Vec<Battle> {
        self.registry.sweep_expired(now)
    }

    // ========================================================================
    // Crowd
    // ========================================================================

    /// Join a battle's crowd.
    pub fn join_spectators(&mut self, id: BattleId, user: UserId) -> Result<(), BattleError> {
        crowd::join_spectators(self.battle_mut(id)?, user)
    }

    /// Attach the fight thread and admit pending spectators.
    pub fn attach_thread(&mut self, id: BattleId, thread: ThreadId) -> Result<usize, BattleError> {
        self.registry.attach_thread(id, thread)
    }

    /// Apply a spectator action.
    pub fn spectator_action(
        &mut self,
        id: BattleId,
        user: UserId,
        action: SpectatorAction,
        rng: &mut dyn RandomSource,
    ) -> Result<CrowdOutcome, BattleError> {
        crowd::spectator_action(self.battle_mut(id)?, user, action, rng, Utc::now())
    }

    /// Display-only damage bonus from cheering spectators.
    pub fn crowd_damage_bonus(&self, id: BattleId, side: Side) -> Option<u32> {
        self.battle(id).map(|b| crowd::crowd_damage_bonus(b, side))
    }

    // ========================================================================
    // Narrative
    // ========================================================================

    /// Start fetching prose for a resolved round.
    ///
    /// Without a narrator the handle resolves to the fallback template.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn narrate_round(&self, report: &RoundReport) -> JoinHandle<String> {
        match &self.narrator {
            Some(narrator) => spawn_round_narrative(Arc::clone(narrator), report.summary.clone()),
            None => {
                let text = report.fallback_narrative();
                tokio::spawn(async move { text })
            }
        }
    }

    /// Prose for a finished battle, falling back to the template.
    pub async fn narrate_outcome(&self, outcome: &OutcomeSummary) -> String {
        match &self.narrator {
            Some(narrator) => narrate_outcome_or_fallback(narrator.as_ref(), outcome).await,
            None => fallback_outcome_narrative(outcome),
        }
    }

    /// Request an illustration for a highlight round, if one is warranted.
    pub async fn illustrate(&self, report: &RoundReport) -> Option<Vec<u8>> {
        let illustrator = self.illustrator.as_ref()?;
        if !should_illustrate(&report.result, report.is_finished()) {
            return None;
        }
        let prompt = illustration_prompt(&report.summary, report.outcome.as_ref());
        let references = self
            .battle(report.battle_id)
            .map(Battle::reference_images)
            .unwrap_or_default();
        match illustrator.illustrate(&prompt, &references).await {
            Ok(image) => image,
            Err(e) => {
                warn!(battle_id = %report.battle_id, error = %e, "illustration failed");
                None
            }
        }
    }

    /// Fetch prose and an illustration for a round concurrently.
    pub async fn present_round(&self, report: &RoundReport) -> (String, Option<Vec<u8>>) {
        let narrative = async {
            match &self.narrator {
                Some(narrator) => {
                    narrate_round_or_fallback(narrator.as_ref(), &report.summary).await
                }
                None => report.fallback_narrative(),
            }
        };
        futures::join!(narrative, self.illustrate(report))
    }

    /// Store display text and an optional image link on a logged round.
    pub fn record_narrative(
        &mut self,
        id: BattleId,
        round: u32,
        narrative: String,
        image: Option<String>,
    ) -> Result<(), BattleError> {
        if self.battle_mut(id)?.annotate_round(round, narrative, image) {
            Ok(())
        } else {
            Err(BattleError::NotFound)
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save every battle. Failures are logged and reported as `false`;
    /// in-memory state is unaffected.
    pub async fn save(&self, path: impl AsRef<Path>) -> bool {
        let saved = SavedArena::from_registry(&self.registry);
        match saved.save_json(path.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "failed to save arena");
                false
            }
        }
    }

    /// Replace the current battles with a saved arena. Failures are logged
    /// and leave the current state untouched. Returns the number restored.
    pub async fn load(&mut self, path: impl AsRef<Path>) -> usize {
        let battles = match SavedArena::load_json(path.as_ref()).await {
            Ok(saved) => saved.into_battles(),
            Err(e) => Err(e),
        };
        match battles {
            Ok(battles) => {
                let count = battles.len();
                self.registry.restore(battles);
                info!(count, "arena restored");
                count
            }
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "failed to load arena");
                0
            }
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}
