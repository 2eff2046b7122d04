//! Narrative and illustration collaborators.
//!
//! Round math is committed before any narrative is requested. A narrator
//! only ever produces display text: when it fails, times out or is
//! cancelled, the deterministic template is used instead and game state is
//! unaffected.

mod claude;

pub use claude::{ClaudeNarrator, NarratorConfig};

use crate::battle::{Battle, RoundResult, Side};
use crate::state::{is_epic_victory, winner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

/// Errors from narrative or image collaborators.
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Narrator returned no text")]
    Empty,
}

// ============================================================================
// Summaries
// ============================================================================

/// Everything a narrator needs to describe one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub red_name: String,
    pub blue_name: String,
    pub red_action: String,
    pub blue_action: String,
    pub red_damage: i32,
    pub blue_damage: i32,
    pub red_critical: bool,
    pub blue_critical: bool,
    pub first: Side,
    pub red_hp: i32,
    pub blue_hp: i32,
    pub crowd_energy: u32,
}

impl RoundSummary {
    /// Build a summary of a logged round against the battle's current state.
    ///
    /// Returns `None` before an opponent has accepted.
    pub fn from_battle(battle: &Battle, result: &RoundResult) -> Option<Self> {
        let (red, blue) = battle.duel()?;
        Some(Self {
            round: result.round,
            red_name: red.display_name.clone(),
            blue_name: blue.display_name.clone(),
            red_action: result.red_action.clone(),
            blue_action: result.blue_action.clone(),
            red_damage: result.red_damage,
            blue_damage: result.blue_damage,
            red_critical: result.red_critical,
            blue_critical: result.blue_critical,
            first: result.first,
            red_hp: red.hp(),
            blue_hp: blue.hp(),
            crowd_energy: battle.crowd_energy(),
        })
    }

    fn name(&self, side: Side) -> &str {
        match side {
            Side::Red => &self.red_name,
            Side::Blue => &self.blue_name,
        }
    }

    fn action(&self, side: Side) -> &str {
        match side {
            Side::Red => &self.red_action,
            Side::Blue => &self.blue_action,
        }
    }

    fn damage(&self, side: Side) -> i32 {
        match side {
            Side::Red => self.red_damage,
            Side::Blue => self.blue_damage,
        }
    }

    fn critical(&self, side: Side) -> bool {
        match side {
            Side::Red => self.red_critical,
            Side::Blue => self.blue_critical,
        }
    }
}

/// How a finished battle ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub winner_name: String,
    pub loser_name: String,
    pub winner_side: Side,
    pub rounds: u32,
    pub winner_hp: i32,
    pub epic: bool,
    pub knockout: bool,
}

impl OutcomeSummary {
    /// Summarize a finished battle. Returns `None` if there is no winner yet.
    pub fn from_battle(battle: &Battle) -> Option<Self> {
        if !battle.is_finished() {
            return None;
        }
        let side = winner(battle)?;
        let winner_fighter = battle.fighter(side)?;
        let loser = battle.fighter(side.opposite())?;
        Some(Self {
            winner_name: winner_fighter.display_name.clone(),
            loser_name: loser.display_name.clone(),
            winner_side: side,
            rounds: battle.log().len() as u32,
            winner_hp: winner_fighter.hp(),
            epic: is_epic_victory(battle),
            knockout: loser.is_down(),
        })
    }
}

// ============================================================================
// Fallback Templates
// ============================================================================

fn strike_line(summary: &RoundSummary, side: Side) -> String {
    let crit = if summary.critical(side) { " A critical hit!" } else { "" };
    format!(
        "{} answers with {} for {} damage.{}",
        summary.name(side),
        summary.action(side),
        summary.damage(side),
        crit
    )
}

/// Deterministic round narrative used when no narrator is available.
pub fn fallback_round_narrative(summary: &RoundSummary) -> String {
    let first = summary.first;
    let second = first.opposite();
    let crit = if summary.critical(first) { " A critical hit!" } else { "" };
    let mut text = format!(
        "Round {}: {} moves first with {} for {} damage.{}",
        summary.round,
        summary.name(first),
        summary.action(first),
        summary.damage(first),
        crit
    );

    let second_hp = match second {
        Side::Red => summary.red_hp,
        Side::Blue => summary.blue_hp,
    };
    if summary.damage(second) == 0 && second_hp == 0 {
        text.push_str(&format!(" {} falls before striking back!", summary.name(second)));
    } else {
        text.push(' ');
        text.push_str(&strike_line(summary, second));
    }
    text
}

/// Deterministic victory narrative used when no narrator is available.
pub fn fallback_outcome_narrative(outcome: &OutcomeSummary) -> String {
    let how = if outcome.knockout {
        format!("knocks out {}", outcome.loser_name)
    } else {
        format!("outlasts {}", outcome.loser_name)
    };
    let epic = if outcome.epic { " An epic victory!" } else { "" };
    format!(
        "{} {} after {} round{} with {} HP left.{}",
        outcome.winner_name,
        how,
        outcome.rounds,
        if outcome.rounds == 1 { "" } else { "s" },
        outcome.winner_hp,
        epic
    )
}

// ============================================================================
// Collaborators
// ============================================================================

/// Produces flavour text for rounds and outcomes.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate_round(&self, summary: &RoundSummary) -> Result<String, NarrativeError>;

    async fn narrate_outcome(&self, outcome: &OutcomeSummary) -> Result<String, NarrativeError>;
}

/// Renders a highlight moment as raster image bytes.
///
/// `references` holds the fighters' portraits, when they have any.
/// `Ok(None)` means the service chose not to draw anything. The host
/// uploads the bytes and records the resulting link with
/// `Arena::record_narrative`.
#[async_trait]
pub trait Illustrator: Send + Sync {
    async fn illustrate(
        &self,
        prompt: &str,
        references: &[String],
    ) -> Result<Option<Vec<u8>>, NarrativeError>;
}

/// Narrate a round, falling back to the template on any error.
pub async fn narrate_round_or_fallback(narrator: &dyn Narrator, summary: &RoundSummary) -> String {
    match narrator.narrate_round(summary).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(round = summary.round, "narrator returned empty text, using fallback");
            fallback_round_narrative(summary)
        }
        Err(e) => {
            warn!(round = summary.round, error = %e, "round narration failed, using fallback");
            fallback_round_narrative(summary)
        }
    }
}

/// Narrate an outcome, falling back to the template on any error.
pub async fn narrate_outcome_or_fallback(
    narrator: &dyn Narrator,
    outcome: &OutcomeSummary,
) -> String {
    match narrator.narrate_outcome(outcome).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => fallback_outcome_narrative(outcome),
        Err(e) => {
            warn!(
                winner = %outcome.winner_name,
                error = %e,
                "outcome narration failed, using fallback"
            );
            fallback_outcome_narrative(outcome)
        }
    }
}

/// Fetch a round narrative on a background task.
///
/// Aborting the returned handle drops the request; the round is already
/// committed, so nothing needs to be rolled back.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn spawn_round_narrative(
    narrator: Arc<dyn Narrator>,
    summary: RoundSummary,
) -> JoinHandle<String> {
    tokio::spawn(async move { narrate_round_or_fallback(narrator.as_ref(), &summary).await })
}

/// Whether a round deserves an illustration: a critical hit or the final blow.
pub fn should_illustrate(result: &RoundResult, finished: bool) -> bool {
    finished || result.any_critical()
}

/// Image prompt for a highlight moment.
pub fn illustration_prompt(summary: &RoundSummary, outcome: Option<&OutcomeSummary>) -> String {
    match outcome {
        Some(outcome) => format!(
            "Arena victory scene: {} stands triumphant over {} after {} rounds, roaring crowd, dramatic lighting",
            outcome.winner_name, outcome.loser_name, outcome.rounds
        ),
        None => {
            let side = if summary.critical(summary.first) {
                summary.first
            } else {
                summary.first.opposite()
            };
            format!(
                "Arena critical hit: {} lands a devastating {} on {}, sparks flying, crowd on its feet",
                summary.name(side),
                summary.action(side),
                summary.name(side.opposite())
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNarrator;

    fn summary() -> RoundSummary {
        RoundSummary {
            round: 2,
            red_name: "Ash".to_string(),
            blue_name: "Bryn".to_string(),
            red_action: "Strike".to_string(),
            blue_action: "Power Attack".to_string(),
            red_damage: 12,
            blue_damage: 20,
            red_critical: false,
            blue_critical: true,
            first: Side::Blue,
            red_hp: 80,
            blue_hp: 113,
            crowd_energy: 30,
        }
    }

    fn outcome() -> OutcomeSummary {
        OutcomeSummary {
            winner_name: "Ash".to_string(),
            loser_name: "Bryn".to_string(),
            winner_side: Side::Red,
            rounds: 3,
            winner_hp: 7,
            epic: true,
            knockout: true,
        }
    }

    #[test]
    fn test_fallback_round_narrative() {
        let text = fallback_round_narrative(&summary());
        assert_eq!(
            text,
            "Round 2: Bryn moves first with Power Attack for 20 damage. A critical hit! \
             Ash answers with Strike for 12 damage."
        );
    }

    #[test]
    fn test_fallback_round_knockout() {
        let mut s = summary();
        s.red_damage = 0;
        s.red_hp = 0;
        let text = fallback_round_narrative(&s);
        assert!(text.ends_with("Ash falls before striking back!"));
    }

    #[test]
    fn test_fallback_outcome_narrative() {
        assert_eq!(
            fallback_outcome_narrative(&outcome()),
            "Ash knocks out Bryn after 3 rounds with 7 HP left. An epic victory!"
        );
    }

    #[test]
    fn test_illustration_prompt_names_critical_striker() {
        let prompt = illustration_prompt(&summary(), None);
        assert!(prompt.contains("Bryn lands a devastating Power Attack on Ash"));
        let prompt = illustration_prompt(&summary(), Some(&outcome()));
        assert!(prompt.contains("Ash stands triumphant over Bryn"));
    }

    #[tokio::test]
    async fn test_narrator_failure_falls_back() {
        let narrator = MockNarrator::failing();
        let text = narrate_round_or_fallback(&narrator, &summary()).await;
        assert_eq!(text, fallback_round_narrative(&summary()));
        let text = narrate_outcome_or_fallback(&narrator, &outcome()).await;
        assert_eq!(text, fallback_outcome_narrative(&outcome()));
    }

    #[tokio::test]
    async fn test_scripted_narrator_used() {
        let narrator = MockNarrator::new(vec!["Steel meets steel.".to_string()]);
        let text = narrate_round_or_fallback(&narrator, &summary()).await;
        assert_eq!(text, "Steel meets steel.");
    }

    #[tokio::test]
    async fn test_spawned_narrative_completes() {
        let narrator: Arc<dyn Narrator> = Arc::new(MockNarrator::new(vec!["Clash!".to_string()]));
        let handle = spawn_round_narrative(narrator, summary());
        assert_eq!(handle.await.unwrap(), "Clash!");
    }

    #[tokio::test]
    async fn test_spawned_narrative_can_be_cancelled() {
        let narrator: Arc<dyn Narrator> = Arc::new(MockNarrator::stalled());
        let handle = spawn_round_narrative(narrator, summary());
        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
