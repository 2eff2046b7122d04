//! Spectator and crowd engine.
//!
//! Spectators cheer, stir up bloodlust or surge the crowd. Each action
//! feeds crowd energy; when energy reaches 100 it discharges into a random
//! [`ArenaEvent`] and resets to 0.

use crate::battle::{Battle, CrowdBias, Side, Spectator, UserId};
use crate::combat::CrowdBonus;
use crate::fighter::{Buff, BuffKind};
use crate::rng::RandomSource;
use crate::state::BattleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Crowd energy at which an arena event fires.
pub const MAX_CROWD_ENERGY: u32 = 100;

/// Display bonus per cheering spectator, and its cap.
const CHEER_DISPLAY_BONUS: u32 = 5;
const CHEER_DISPLAY_CAP: u32 = 50;

/// Something a spectator can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectatorAction {
    CheerRed,
    CheerBlue,
    Bloodlust,
    Surge,
}

impl SpectatorAction {
    pub fn name(&self) -> &'static str {
        match self {
            SpectatorAction::CheerRed => "cheer_red",
            SpectatorAction::CheerBlue => "cheer_blue",
            SpectatorAction::Bloodlust => "bloodlust",
            SpectatorAction::Surge => "surge",
        }
    }

    /// Crowd energy this action adds.
    pub fn energy(&self) -> u32 {
        match self {
            SpectatorAction::CheerRed | SpectatorAction::CheerBlue => 5,
            SpectatorAction::Bloodlust => 10,
            SpectatorAction::Surge => 15,
        }
    }
}

impl fmt::Display for SpectatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SpectatorAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cheer_red" => Ok(SpectatorAction::CheerRed),
            "cheer_blue" => Ok(SpectatorAction::CheerBlue),
            "bloodlust" => Ok(SpectatorAction::Bloodlust),
            "surge" => Ok(SpectatorAction::Surge),
            other => Err(format!("Unknown spectator action: {other}")),
        }
    }
}

/// A battle-wide effect fired when crowd energy saturates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// One side gets a 2-round +20% damage buff. `applied` is false when
    /// the chosen corner is still empty.
    PowerSurge { side: Side, applied: bool },
    /// Each present side gets a random 2-round buff.
    ChaosField { buffs: Vec<(Side, BuffKind, f64)> },
    /// Each present side takes non-lethal damage.
    ArenaHazard { damage: Vec<(Side, i32)> },
}

impl ArenaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ArenaEvent::PowerSurge { .. } => "power_surge",
            ArenaEvent::ChaosField { .. } => "chaos_field",
            ArenaEvent::ArenaHazard { .. } => "arena_hazard",
        }
    }

    /// One-line description for display.
    pub fn describe(&self) -> String {
        match self {
            ArenaEvent::PowerSurge { side, applied: true } => {
                format!("POWER SURGE! The {side} corner is filled with raw power (+20% damage).")
            }
            ArenaEvent::PowerSurge { side, applied: false } => {
                format!("POWER SURGE! The power crackles through the empty {side} corner.")
            }
            ArenaEvent::ChaosField { buffs } => {
                let parts: Vec<String> = buffs
                    .iter()
                    .map(|(side, kind, magnitude)| format!("{side} +{magnitude}% {}", kind.name()))
                    .collect();
                format!("CHAOS FIELD! Wild energy warps the arena ({}).", parts.join(", "))
            }
            ArenaEvent::ArenaHazard { damage } => {
                let parts: Vec<String> = damage
                    .iter()
                    .map(|(side, amount)| format!("{side} -{amount} HP"))
                    .collect();
                format!("ARENA HAZARD! The floor erupts ({}).", parts.join(", "))
            }
        }
    }
}

/// Result of a spectator action.
#[derive(Debug, Clone, PartialEq)]
pub struct CrowdOutcome {
    pub action: SpectatorAction,
    /// Crowd energy after the action (0 if an event fired).
    pub energy: u32,
    pub bias: CrowdBias,
    pub event: Option<ArenaEvent>,
}

// ============================================================================
// Admission
// ============================================================================

/// Register a user as a spectator.
///
/// Before a fight thread exists the user waits in the pending set; after,
/// they are admitted directly. Joining twice is a no-op.
pub fn join_spectators(battle: &mut Battle, user: UserId) -> Result<(), BattleError> {
    if battle.is_finished() {
        return Err(BattleError::IllegalPhase {
            operation: "join the crowd",
            phase: battle.phase(),
        });
    }
    if battle.is_participant(user) {
        return Err(BattleError::AlreadyParticipant);
    }
    if battle.spectators.contains_key(&user) {
        return Ok(());
    }

    if battle.thread_id.is_some() {
        battle.spectators.insert(user, Spectator::new(user));
    } else {
        battle.pending_spectators.insert(user);
    }
    debug!(battle_id = %battle.id, user_id = %user, "spectator joined");
    Ok(())
}

/// Move every pending spectator into the active crowd. Returns how many
/// were admitted.
pub fn admit_pending(battle: &mut Battle) -> usize {
    let pending: Vec<UserId> = battle.pending_spectators.drain().collect();
    let mut admitted = 0;
    for user in pending {
        if battle.is_participant(user) {
            continue;
        }
        battle
            .spectators
            .entry(user)
            .or_insert_with(|| Spectator::new(user));
        admitted += 1;
    }
    admitted
}

// ============================================================================
// Actions
// ============================================================================

/// Apply a spectator action.
pub fn spectator_action(
    battle: &mut Battle,
    user: UserId,
    action: SpectatorAction,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
) -> Result<CrowdOutcome, BattleError> {
    if battle.is_finished() {
        return Err(BattleError::IllegalPhase {
            operation: "rouse the crowd",
            phase: battle.phase(),
        });
    }
    if battle.is_participant(user) {
        return Err(BattleError::AlreadyParticipant);
    }
    if !battle.spectators.contains_key(&user) {
        return Err(BattleError::NotSpectator);
    }
    if action == SpectatorAction::CheerBlue && battle.blue().is_none() {
        return Err(BattleError::NoOpponent);
    }

    match action {
        SpectatorAction::CheerRed => cheer(battle, user, Side::Red),
        SpectatorAction::CheerBlue => cheer(battle, user, Side::Blue),
        SpectatorAction::Bloodlust => {
            for fighter in battle.fighters_mut() {
                fighter.add_modifier(Buff::new(BuffKind::Damage, 10.0, 1, "bloodlust"));
                fighter.add_modifier(Buff::new(BuffKind::Defense, -10.0, 1, "bloodlust"));
            }
        }
        SpectatorAction::Surge => {}
    }

    if let Some(spectator) = battle.spectators.get_mut(&user) {
        spectator.last_action_at = Some(now);
    }
    debug!(battle_id = %battle.id, user_id = %user, %action, "spectator action");

    let event = add_energy(battle, action.energy(), rng);
    Ok(CrowdOutcome {
        action,
        energy: battle.crowd_energy,
        bias: battle.crowd_bias,
        event,
    })
}

fn cheer(battle: &mut Battle, user: UserId, side: Side) {
    if let Some(spectator) = battle.spectators.get_mut(&user) {
        spectator.cheered_for = Some(side);
    }
    battle.crowd_bias = compute_bias(battle);
}

/// Bias toward whichever side has strictly more cheering spectators.
pub fn compute_bias(battle: &Battle) -> CrowdBias {
    let red = cheer_count(battle, Side::Red);
    let blue = cheer_count(battle, Side::Blue);
    match red.cmp(&blue) {
        std::cmp::Ordering::Greater => CrowdBias::Red,
        std::cmp::Ordering::Less => CrowdBias::Blue,
        std::cmp::Ordering::Equal => CrowdBias::Neutral,
    }
}

/// Spectators currently cheering for a side.
pub fn cheer_count(battle: &Battle, side: Side) -> u32 {
    battle
        .spectators
        .values()
        .filter(|s| s.cheered_for == Some(side))
        .count() as u32
}

/// Add crowd energy, firing an arena event on saturation.
pub fn add_energy(
    battle: &mut Battle,
    amount: u32,
    rng: &mut dyn RandomSource,
) -> Option<ArenaEvent> {
    battle.crowd_energy = (battle.crowd_energy + amount).min(MAX_CROWD_ENERGY);
    if battle.crowd_energy < MAX_CROWD_ENERGY {
        return None;
    }
    battle.crowd_energy = 0;
    Some(trigger_arena_event(battle, rng))
}

// ============================================================================
// Arena Events
// ============================================================================

/// Pick and apply one of the three arena events uniformly at random.
pub fn trigger_arena_event(battle: &mut Battle, rng: &mut dyn RandomSource) -> ArenaEvent {
    let event = match rng.index(3) {
        0 => power_surge(battle, rng),
        1 => chaos_field(battle, rng),
        _ => arena_hazard(battle),
    };
    info!(battle_id = %battle.id, event = event.name(), "arena event");
    event
}

fn power_surge(battle: &mut Battle, rng: &mut dyn RandomSource) -> ArenaEvent {
    let side = if rng.coin() { Side::Red } else { Side::Blue };
    let applied = match battle.fighter_mut(side) {
        Some(fighter) => {
            fighter.add_modifier(Buff::new(BuffKind::Damage, 20.0, 2, "power_surge"));
            true
        }
        None => false,
    };
    ArenaEvent::PowerSurge { side, applied }
}

fn chaos_field(battle: &mut Battle, rng: &mut dyn RandomSource) -> ArenaEvent {
    let mut buffs = Vec::new();
    for side in [Side::Red, Side::Blue] {
        let Some(fighter) = battle.fighter_mut(side) else {
            continue;
        };
        let kind = BuffKind::all()[rng.index(4)];
        let magnitude = (15 + rng.index(20)) as f64;
        fighter.add_modifier(Buff::new(kind, magnitude, 2, "chaos_field"));
        buffs.push((side, kind, magnitude));
    }
    ArenaEvent::ChaosField { buffs }
}

/// Hazard damage for a given endurance: `max(5, 15 - floor(endurance / 10))`.
pub fn hazard_damage(endurance: u32) -> i32 {
    (15 - (endurance / 10) as i32).max(5)
}

fn arena_hazard(battle: &mut Battle) -> ArenaEvent {
    let mut damage = Vec::new();
    for side in [Side::Red, Side::Blue] {
        let Some(fighter) = battle.fighter_mut(side) else {
            continue;
        };
        let amount = hazard_damage(fighter.stats().endurance());
        fighter.take_nonlethal(amount);
        damage.push((side, amount));
    }
    ArenaEvent::ArenaHazard { damage }
}

// ============================================================================
// Bonuses
// ============================================================================

/// Split current crowd energy into per-side resolver bonuses.
///
/// The favoured side gets 70% of the energy and the other 30%; a neutral
/// crowd splits it evenly.
pub fn crowd_bonus(battle: &Battle) -> CrowdBonus {
    let energy = battle.crowd_energy as f64;
    let (red, blue) = match battle.crowd_bias {
        CrowdBias::Red => (0.7, 0.3),
        CrowdBias::Blue => (0.3, 0.7),
        CrowdBias::Neutral => (0.5, 0.5),
    };
    CrowdBonus {
        red: energy * red,
        blue: energy * blue,
    }
}

/// Display-only damage bonus: +5 per cheering spectator, capped at +50.
pub fn crowd_damage_bonus(battle: &Battle, side: Side) -> u32 {
    (cheer_count(battle, side) * CHEER_DISPLAY_BONUS).min(CHEER_DISPLAY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleId, ChannelId, Phase, PhaseTimeouts, ThreadId};
    use crate::fighter::{Combatant, Fighter, Stance, Stats};
    use crate::state::{accept_challenge, set_stance};
    use crate::testing::ScriptedRandom;
    use std::sync::Arc;

    fn fighter(user: u64, endurance: u32) -> Fighter {
        Fighter::new(
            UserId(user),
            format!("F{user}"),
            Arc::new(Combatant::new("Bot", Stats::new(50, 50, 50, endurance, 50))),
        )
    }

    fn battle_with_crowd(spectators: &[u64]) -> Battle {
        let now = Utc::now();
        let mut battle = Battle::new(
            BattleId::new(),
            ChannelId(1),
            fighter(1, 50),
            5,
            PhaseTimeouts::default(),
            now,
        );
        accept_challenge(&mut battle, fighter(2, 120), now).unwrap();
        battle.thread_id = Some(ThreadId(9));
        for id in spectators {
            join_spectators(&mut battle, UserId(*id)).unwrap();
        }
        battle
    }

    #[test]
    fn test_pending_until_thread() {
        let mut battle = Battle::new(
            BattleId::new(),
            ChannelId(1),
            fighter(1, 50),
            5,
            PhaseTimeouts::default(),
            Utc::now(),
        );
        join_spectators(&mut battle, UserId(50)).unwrap();
        assert!(battle.pending_spectators().contains(&UserId(50)));
        assert!(!battle.is_spectator(UserId(50)));
        assert_eq!(
            join_spectators(&mut battle, UserId(1)),
            Err(BattleError::AlreadyParticipant)
        );

        battle.thread_id = Some(ThreadId(3));
        assert_eq!(admit_pending(&mut battle), 1);
        assert!(battle.is_spectator(UserId(50)));
        assert!(battle.pending_spectators().is_empty());
    }

    #[test]
    fn test_unknown_spectator_rejected() {
        let mut battle = battle_with_crowd(&[]);
        let mut rng = ScriptedRandom::new(vec![0.0]);
        let err = spectator_action(
            &mut battle,
            UserId(77),
            SpectatorAction::Surge,
            &mut rng,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, BattleError::NotSpectator);
        assert_eq!(battle.crowd_energy(), 0);
    }

    #[test]
    fn test_cheer_sets_bias() {
        let mut battle = battle_with_crowd(&[10, 11, 12]);
        let mut rng = ScriptedRandom::new(vec![0.0]);
        let now = Utc::now();

        let out = spectator_action(
            &mut battle,
            UserId(10),
            SpectatorAction::CheerRed,
            &mut rng,
            now,
        )
        .unwrap();
        assert_eq!(out.bias, CrowdBias::Red);
        assert_eq!(out.energy, 5);

        spectator_action(
            &mut battle,
            UserId(11),
            SpectatorAction::CheerBlue,
            &mut rng,
            now,
        )
        .unwrap();
        assert_eq!(battle.crowd_bias(), CrowdBias::Neutral);

        spectator_action(
            &mut battle,
            UserId(12),
            SpectatorAction::CheerBlue,
            &mut rng,
            now,
        )
        .unwrap();
        assert_eq!(battle.crowd_bias(), CrowdBias::Blue);
        assert_eq!(battle.crowd_energy(), 15);
        assert_eq!(crowd_damage_bonus(&battle, Side::Blue), 10);
        assert_eq!(
            battle.spectators()[&UserId(12)].last_action_at,
            Some(now)
        );
    }

    #[test]
    fn test_cheer_blue_needs_opponent() {
        let mut battle = Battle::new(
            BattleId::new(),
            ChannelId(1),
            fighter(1, 50),
            5,
            PhaseTimeouts::default(),
            Utc::now(),
        );
        battle.thread_id = Some(ThreadId(3));
        join_spectators(&mut battle, UserId(10)).unwrap();
        let mut rng = ScriptedRandom::new(vec![0.0]);
        let err = spectator_action(
            &mut battle,
            UserId(10),
            SpectatorAction::CheerBlue,
            &mut rng,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, BattleError::NoOpponent);
        assert_eq!(battle.crowd_energy(), 0);
    }

    #[test]
    fn test_bloodlust_buffs_both() {
        let mut battle = battle_with_crowd(&[10]);
        let mut rng = ScriptedRandom::new(vec![0.0]);
        let out = spectator_action(
            &mut battle,
            UserId(10),
            SpectatorAction::Bloodlust,
            &mut rng,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(out.energy, 10);
        for side in [Side::Red, Side::Blue] {
            let f = battle.fighter(side).unwrap();
            assert_eq!(f.modifier(BuffKind::Damage), 10.0);
            assert_eq!(f.modifier(BuffKind::Defense), -10.0);
            assert_eq!(f.buffs()[0].rounds_remaining, 1);
        }
    }

    #[test]
    fn test_energy_saturation_fires_event_and_resets() {
        let mut battle = battle_with_crowd(&[10]);
        // Event index draw 0.0 -> power surge; coin 0.0 -> red.
        let mut rng = ScriptedRandom::new(vec![0.0]);
        let now = Utc::now();
        for _ in 0..6 {
            let out = spectator_action(
                &mut battle,
                UserId(10),
                SpectatorAction::Surge,
                &mut rng,
                now,
            )
            .unwrap();
            assert!(out.event.is_none());
        }
        assert_eq!(battle.crowd_energy(), 90);

        let out = spectator_action(
            &mut battle,
            UserId(10),
            SpectatorAction::Surge,
            &mut rng,
            now,
        )
        .unwrap();
        assert_eq!(out.energy, 0);
        assert_eq!(out.event, Some(ArenaEvent::PowerSurge { side: Side::Red, applied: true }));
        assert_eq!(battle.red().modifier(BuffKind::Damage), 20.0);
        assert!(battle.crowd_energy() <= MAX_CROWD_ENERGY);
    }

    fn open_challenge() -> Battle {
        let mut battle = Battle::new(
            BattleId::new(),
            ChannelId(1),
            fighter(1, 50),
            5,
            PhaseTimeouts::default(),
            Utc::now(),
        );
        battle.thread_id = Some(ThreadId(5));
        battle
    }

    #[test]
    fn test_power_surge_on_empty_corner_fizzles() {
        let mut battle = open_challenge();
        // Event index 0.0 -> power surge; coin 0.9 -> blue, who has not arrived.
        let mut rng = ScriptedRandom::new(vec![0.0, 0.9]);
        let event = trigger_arena_event(&mut battle, &mut rng);
        assert_eq!(event, ArenaEvent::PowerSurge { side: Side::Blue, applied: false });
        assert_eq!(battle.red().modifier(BuffKind::Damage), 0.0);
        assert!(event.describe().contains("empty"));
    }

    #[test]
    fn test_accepting_fighter_leaves_the_crowd() {
        let mut battle = open_challenge();
        let now = Utc::now();
        let mut rng = ScriptedRandom::new(vec![0.5]);
        join_spectators(&mut battle, UserId(2)).unwrap();
        spectator_action(&mut battle, UserId(2), SpectatorAction::CheerRed, &mut rng, now).unwrap();
        assert_eq!(battle.crowd_bias(), CrowdBias::Red);

        accept_challenge(&mut battle, fighter(2, 50), now).unwrap();
        assert!(!battle.is_spectator(UserId(2)));
        assert_eq!(battle.crowd_bias(), CrowdBias::Neutral);
        assert_eq!(
            spectator_action(&mut battle, UserId(2), SpectatorAction::CheerBlue, &mut rng, now),
            Err(BattleError::AlreadyParticipant)
        );
    }

    #[test]
    fn test_pending_spectator_dropped_on_accept() {
        let mut battle = open_challenge();
        battle.thread_id = None;
        join_spectators(&mut battle, UserId(2)).unwrap();
        assert!(battle.pending_spectators().contains(&UserId(2)));

        accept_challenge(&mut battle, fighter(2, 50), Utc::now()).unwrap();
        assert!(battle.pending_spectators().is_empty());
    }

    #[test]
    fn test_chaos_field_magnitudes() {
        let mut battle = battle_with_crowd(&[]);
        // kind index 0.4 -> chaos field; then red kind/magnitude, blue kind/magnitude.
        let mut rng = ScriptedRandom::new(vec![0.4, 0.0, 0.0, 0.99, 0.99]);
        let event = trigger_arena_event(&mut battle, &mut rng);
        match event {
            ArenaEvent::ChaosField { buffs } => {
                assert_eq!(buffs.len(), 2);
                assert_eq!(buffs[0], (Side::Red, BuffKind::Damage, 15.0));
                assert_eq!(buffs[1], (Side::Blue, BuffKind::Speed, 34.0));
            }
            other => panic!("expected chaos field, got {other:?}"),
        }
        assert_eq!(battle.blue().unwrap().modifier(BuffKind::Speed), 34.0);
    }

    #[test]
    fn test_hazard_cannot_knock_out() {
        let mut battle = battle_with_crowd(&[]);
        battle.red.take_damage(battle.red.max_hp() - 3);
        let mut rng = ScriptedRandom::new(vec![0.9]);
        let event = trigger_arena_event(&mut battle, &mut rng);

        assert_eq!(
            event,
            ArenaEvent::ArenaHazard {
                damage: vec![(Side::Red, 10), (Side::Blue, 5)]
            }
        );
        assert_eq!(battle.red().hp(), 1);
        let blue = battle.blue().unwrap();
        assert_eq!(blue.hp(), blue.max_hp() - 5);
    }

    #[test]
    fn test_hazard_damage_formula() {
        assert_eq!(hazard_damage(0), 15);
        assert_eq!(hazard_damage(50), 10);
        assert_eq!(hazard_damage(59), 10);
        assert_eq!(hazard_damage(100), 5);
        assert_eq!(hazard_damage(300), 5);
    }

    #[test]
    fn test_crowd_bonus_split() {
        let mut battle = battle_with_crowd(&[10]);
        battle.crowd_energy = 80;
        assert_eq!(crowd_bonus(&battle), CrowdBonus { red: 40.0, blue: 40.0 });
        battle.crowd_bias = CrowdBias::Red;
        let bonus = crowd_bonus(&battle);
        assert!((bonus.red - 56.0).abs() < 1e-9);
        assert!((bonus.blue - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_bonus_caps() {
        let ids: Vec<u64> = (100..120).collect();
        let mut battle = battle_with_crowd(&ids);
        let mut rng = ScriptedRandom::new(vec![0.99]);
        for id in &ids {
            spectator_action(
                &mut battle,
                UserId(*id),
                SpectatorAction::CheerRed,
                &mut rng,
                Utc::now(),
            )
            .unwrap();
        }
        assert_eq!(crowd_damage_bonus(&battle, Side::Red), 50);
        assert_eq!(crowd_damage_bonus(&battle, Side::Blue), 0);
    }

    #[test]
    fn test_actions_rejected_once_finished() {
        let mut battle = battle_with_crowd(&[10]);
        let now = Utc::now();
        set_stance(&mut battle, UserId(1), Stance::Aggressive, now).unwrap();
        set_stance(&mut battle, UserId(2), Stance::Aggressive, now).unwrap();
        crate::state::forfeit(&mut battle, UserId(1)).unwrap();
        assert_eq!(battle.phase(), Phase::Finished);

        let mut rng = ScriptedRandom::new(vec![0.0]);
        let result = spectator_action(
            &mut battle,
            UserId(10),
            SpectatorAction::Surge,
            &mut rng,
            now,
        );
        assert!(result.is_err());
    }
}
