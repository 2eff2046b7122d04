//! Battle state machine.
//!
//! `challenge -> prebattle -> combat -> finished`. These functions are the
//! only code that changes a battle's phase, stances, actions, HP or round
//! counter. Every failure is a game-rule violation reported as a
//! [`BattleError`]; a failed call leaves the battle untouched.

use crate::battle::{Battle, EngagedPhase, Phase, RoundResult, Side, Stage, UserId};
use crate::combat::CombatResolution;
use crate::fighter::{Fighter, Stance};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

/// Game-rule violations. The message is shown to the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    #[error("Battle not found")]
    NotFound,

    #[error("Cannot {operation} while the battle is in the {phase} phase")]
    IllegalPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("You are not fighting in this battle")]
    NotParticipant,

    #[error("You cannot challenge yourself")]
    SelfChallenge,

    #[error("You are already in a battle")]
    UserBusy,

    #[error("Only the challenger can cancel this challenge")]
    NotChallenger,

    #[error("You are not watching this battle")]
    NotSpectator,

    #[error("Fighters cannot spectate their own battle")]
    AlreadyParticipant,

    #[error("There is no blue fighter yet")]
    NoOpponent,

    #[error("Both fighters must choose an action first")]
    ActionsPending,
}

fn require_phase(
    battle: &Battle,
    expected: Phase,
    operation: &'static str,
) -> Result<(), BattleError> {
    let phase = battle.phase();
    if phase == expected {
        Ok(())
    } else {
        Err(BattleError::IllegalPhase { operation, phase })
    }
}

/// Accept a pending challenge with the opponent's fighter.
pub fn accept_challenge(
    battle: &mut Battle,
    opponent: Fighter,
    now: DateTime<Utc>,
) -> Result<(), BattleError> {
    require_phase(battle, Phase::Challenge, "accept a challenge")?;
    if opponent.user_id == battle.red.user_id {
        return Err(BattleError::SelfChallenge);
    }

    info!(battle_id = %battle.id, user_id = %opponent.user_id, "challenge accepted");
    // A fighter cannot also sit in the crowd.
    battle.pending_spectators.remove(&opponent.user_id);
    if battle.spectators.remove(&opponent.user_id).is_some() {
        battle.crowd_bias = crate::crowd::compute_bias(battle);
    }
    battle.stage = Stage::Engaged {
        blue: opponent,
        phase: EngagedPhase::Prebattle,
    };
    battle.reset_expiry(now);
    Ok(())
}

/// Record a fighter's stance. Starts combat once both stances are set.
///
/// Returns true if this call moved the battle into combat.
pub fn set_stance(
    battle: &mut Battle,
    user: UserId,
    stance: Stance,
    now: DateTime<Utc>,
) -> Result<bool, BattleError> {
    require_phase(battle, Phase::Prebattle, "choose a stance")?;
    let side = battle.side_of(user).ok_or(BattleError::NotParticipant)?;

    if let Some(fighter) = battle.fighter_mut(side) {
        fighter.set_stance(stance);
    }
    debug!(battle_id = %battle.id, %side, %stance, "stance set");

    let both_ready = battle
        .duel()
        .is_some_and(|(red, blue)| red.stance().is_some() && blue.stance().is_some());
    if both_ready {
        battle.set_engaged_phase(EngagedPhase::Combat);
        battle.round = 1;
        battle.round_started_at = Some(now);
        battle.reset_expiry(now);
        info!(battle_id = %battle.id, "combat started");
    }
    Ok(both_ready)
}

/// Record a fighter's chosen ability for the current round.
///
/// Does not resolve the round; callers check
/// [`Battle::both_actions_ready`] and call [`resolve_round`].
pub fn set_action(
    battle: &mut Battle,
    user: UserId,
    ability: &str,
) -> Result<Side, BattleError> {
    require_phase(battle, Phase::Combat, "choose an action")?;
    let side = battle.side_of(user).ok_or(BattleError::NotParticipant)?;

    if let Some(fighter) = battle.fighter_mut(side) {
        fighter.set_action(ability);
    }
    debug!(battle_id = %battle.id, %side, ability, round = battle.round, "action set");
    Ok(side)
}

/// Apply a combat resolution and advance the battle.
///
/// Applies HP changes, appends the round log, clears actions, ticks every
/// buff and debuff, then finishes the battle on a knockout or once
/// `max_rounds` is reached; otherwise starts the next round.
pub fn resolve_round(
    battle: &mut Battle,
    resolution: &CombatResolution,
    now: DateTime<Utc>,
) -> Result<RoundResult, BattleError> {
    require_phase(battle, Phase::Combat, "resolve a round")?;
    let round = battle.round;

    let (red, blue) = battle.duel_mut().ok_or(BattleError::NoOpponent)?;
    blue.take_damage(resolution.red.damage);
    red.take_damage(resolution.blue.damage);

    let result = RoundResult {
        round,
        red_action: resolution.red.ability.clone(),
        blue_action: resolution.blue.ability.clone(),
        red_damage: resolution.red.damage,
        blue_damage: resolution.blue.damage,
        red_critical: resolution.red.critical,
        blue_critical: resolution.blue.critical,
        first: resolution.first,
        narrative: resolution.summary(),
        image: None,
    };

    for fighter in [&mut *red, &mut *blue] {
        fighter.clear_action();
        fighter.tick_modifiers();
    }
    let knockout = red.is_down() || blue.is_down();

    battle.log.push(result.clone());

    if knockout || round >= battle.max_rounds {
        battle.set_engaged_phase(EngagedPhase::Finished);
        info!(battle_id = %battle.id, round, knockout, "battle finished");
    } else {
        battle.round += 1;
        battle.round_started_at = Some(now);
        battle.reset_expiry(now);
        debug!(battle_id = %battle.id, round = battle.round, "next round");
    }

    Ok(result)
}

/// Concede the battle. Legal from any phase except `finished`.
pub fn forfeit(battle: &mut Battle, user: UserId) -> Result<Side, BattleError> {
    if battle.is_finished() {
        return Err(BattleError::IllegalPhase {
            operation: "forfeit",
            phase: Phase::Finished,
        });
    }
    let side = battle.side_of(user).ok_or(BattleError::NotParticipant)?;

    // An unanswered challenge has no opponent to hand the win to. It stays
    // in the challenge phase and the registry drops it.
    if battle.phase() != Phase::Challenge {
        if let Some(fighter) = battle.fighter_mut(side) {
            fighter.knock_out();
        }
        battle.set_engaged_phase(EngagedPhase::Finished);
    }
    info!(battle_id = %battle.id, user_id = %user, %side, "battle forfeited");
    Ok(side)
}

/// Check that `user` may cancel this challenge.
///
/// The registry removes the battle once this passes.
pub fn check_cancel(battle: &Battle, user: UserId) -> Result<(), BattleError> {
    require_phase(battle, Phase::Challenge, "cancel a challenge")?;
    if battle.red.user_id != user {
        return Err(BattleError::NotChallenger);
    }
    Ok(())
}

/// The winning side of a finished battle.
///
/// A knockout decides it outright. Otherwise higher HP wins, then higher
/// agility, then red.
pub fn winner(battle: &Battle) -> Option<Side> {
    if !battle.is_finished() {
        return None;
    }
    let (red, blue) = battle.duel()?;

    match (red.is_down(), blue.is_down()) {
        (true, false) => return Some(Side::Blue),
        (false, true) => return Some(Side::Red),
        _ => {}
    }

    let by_hp = red.hp().cmp(&blue.hp());
    let by_agility = red.stats().agility().cmp(&blue.stats().agility());
    match by_hp.then(by_agility) {
        std::cmp::Ordering::Less => Some(Side::Blue),
        _ => Some(Side::Red),
    }
}

/// Whether a finished battle counts as an epic victory.
pub fn is_epic_victory(battle: &Battle) -> bool {
    let Some(side) = winner(battle) else {
        return false;
    };
    let winner_hp = battle.fighter(side).map(|f| f.hp()).unwrap_or(0);

    battle.round >= 5 || battle.crowd_energy == 100 || winner_hp < 10
}
