//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p arena-core --test live_narrator -- --ignored --nocapture`

use arena_core::narrative::{OutcomeSummary, RoundSummary};
use arena_core::testing::TestHarness;
use arena_core::{ClaudeNarrator, Narrator, NarratorConfig, Side, Stance};
use std::sync::Arc;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_claude_narrates_round() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let narrator = ClaudeNarrator::from_env(NarratorConfig::default()).expect("narrator");
    let summary = RoundSummary {
        round: 2,
        red_name: "Ash".to_string(),
        blue_name: "Bryn".to_string(),
        red_action: "Power Attack".to_string(),
        blue_action: "Flame Lash".to_string(),
        red_damage: 31,
        blue_damage: 18,
        red_critical: true,
        blue_critical: false,
        first: Side::Red,
        red_hp: 92,
        blue_hp: 60,
        crowd_energy: 55,
    };

    let text = narrator.narrate_round(&summary).await.expect("narration");
    println!("{text}");
    assert!(!text.trim().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_claude_narrates_outcome() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let narrator = ClaudeNarrator::from_env(NarratorConfig::default()).expect("narrator");
    let outcome = OutcomeSummary {
        winner_name: "Ash".to_string(),
        loser_name: "Bryn".to_string(),
        winner_side: Side::Red,
        rounds: 5,
        winner_hp: 8,
        epic: true,
        knockout: false,
    };
    let text = narrator.narrate_outcome(&outcome).await.expect("narration");
    println!("{text}");
    assert!(!text.trim().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_arena_round_with_live_narrator() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let narrator = ClaudeNarrator::from_env(NarratorConfig::default()).expect("narrator");
    let mut harness = TestHarness::new(Stance::Deceptive, Stance::Defensive).expect("harness");
    harness.arena = std::mem::take(&mut harness.arena).with_narrator(Arc::new(narrator));

    let report = harness.play_round("Power Attack", "Defend").expect("round");
    let text = harness.arena.narrate_round(&report).await.expect("task");
    println!("{text}");
    assert!(!text.trim().is_empty());
}
