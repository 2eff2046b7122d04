//! Spectator admission, crowd energy and arena events.

use arena_core::battle::{ChannelId, CrowdBias, UserId};
use arena_core::crowd::MAX_CROWD_ENERGY;
use arena_core::testing::{
    assert_energy_in_bounds, assert_hp_in_bounds, assert_rejected, sample_combatant, TestHarness,
    BLUE_USER, RED_USER,
};
use arena_core::{Arena, ArenaEvent, BattleError, ScriptedRandom, Side, SpectatorAction, Stance};

fn harness_with_crowd(size: u64) -> TestHarness {
    let mut harness = TestHarness::new(Stance::Aggressive, Stance::Deceptive).unwrap();
    for id in 0..size {
        harness.add_spectator(UserId(100 + id)).unwrap();
    }
    harness
}

#[test]
fn test_participants_cannot_spectate() {
    let mut harness = harness_with_crowd(0);
    assert_rejected(harness.add_spectator(RED_USER), BattleError::AlreadyParticipant);
    assert_rejected(
        harness.crowd(BLUE_USER, SpectatorAction::Surge),
        BattleError::NotSpectator,
    );
}

#[test]
fn test_cheer_blue_before_accept_fails() {
    let mut arena = Arena::default();
    let id = arena
        .challenge(ChannelId(1), RED_USER, "Ash", sample_combatant("Ash"))
        .unwrap();
    arena.attach_thread(id, arena_core::battle::ThreadId(5)).unwrap();
    arena.join_spectators(id, UserId(9)).unwrap();

    let mut rng = ScriptedRandom::new(vec![0.5]);
    assert_rejected(
        arena.spectator_action(id, UserId(9), SpectatorAction::CheerBlue, &mut rng),
        BattleError::NoOpponent,
    );
    let outcome = arena
        .spectator_action(id, UserId(9), SpectatorAction::CheerRed, &mut rng)
        .unwrap();
    assert_eq!(outcome.bias, CrowdBias::Red);
}

#[test]
fn test_bias_follows_strict_majority() {
    let mut harness = harness_with_crowd(3);
    harness.crowd(UserId(100), SpectatorAction::CheerBlue).unwrap();
    harness.crowd(UserId(101), SpectatorAction::CheerRed).unwrap();
    assert_eq!(harness.battle().unwrap().crowd_bias(), CrowdBias::Neutral);

    // Switching allegiance moves the spectator's vote.
    harness.crowd(UserId(101), SpectatorAction::CheerBlue).unwrap();
    assert_eq!(harness.battle().unwrap().crowd_bias(), CrowdBias::Blue);
    assert_eq!(
        harness.arena.crowd_damage_bonus(harness.battle_id, Side::Blue),
        Some(10)
    );
}

#[test]
fn test_energy_discharges_into_event() {
    let mut harness = harness_with_crowd(1);
    // First draw picks the event kind: 0.9 selects the arena hazard.
    harness.script(vec![0.9]);

    let mut fired = None;
    for _ in 0..7 {
        let outcome = harness.crowd(UserId(100), SpectatorAction::Surge).unwrap();
        assert!(outcome.energy <= MAX_CROWD_ENERGY);
        if outcome.event.is_some() {
            fired = outcome.event;
        }
    }

    match fired {
        Some(ArenaEvent::ArenaHazard { damage }) => {
            assert_eq!(damage, vec![(Side::Red, 10), (Side::Blue, 10)]);
        }
        other => panic!("expected arena hazard, got {other:?}"),
    }
    let battle = harness.battle().unwrap();
    assert_eq!(battle.crowd_energy(), 0);
    assert_eq!(battle.red().hp(), battle.red().max_hp() - 10);
}

#[test]
fn test_crowded_rounds_keep_invariants() {
    let mut harness = harness_with_crowd(5);
    harness.script(vec![0.13, 0.72, 0.41, 0.98, 0.05, 0.66, 0.29]);
    let actions = [
        SpectatorAction::Surge,
        SpectatorAction::Bloodlust,
        SpectatorAction::CheerRed,
        SpectatorAction::CheerBlue,
    ];

    for round in 0..5u64 {
        for id in 0..5u64 {
            let action = actions[((round + id) % 4) as usize];
            harness.crowd(UserId(100 + id), action).unwrap();
            assert_energy_in_bounds(harness.battle().unwrap());
        }
        let report = harness.play_round("Strike", "Power Attack").unwrap();
        assert_hp_in_bounds(harness.battle().unwrap());
        if report.is_finished() {
            break;
        }
    }
}

#[test]
fn test_spectator_who_accepts_cannot_cheer_for_themselves() {
    let mut arena = Arena::default();
    let id = arena
        .challenge(ChannelId(1), RED_USER, "Ash", sample_combatant("Ash"))
        .unwrap();
    arena.attach_thread(id, arena_core::battle::ThreadId(5)).unwrap();
    arena.join_spectators(id, BLUE_USER).unwrap();
    arena
        .accept(id, BLUE_USER, "Bryn", sample_combatant("Bryn"))
        .unwrap();

    let mut rng = ScriptedRandom::new(vec![0.5]);
    assert_rejected(
        arena.spectator_action(id, BLUE_USER, SpectatorAction::CheerBlue, &mut rng),
        BattleError::AlreadyParticipant,
    );
    assert_eq!(arena.battle(id).unwrap().crowd_bias(), CrowdBias::Neutral);
}
