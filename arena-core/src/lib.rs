//! Battle engine for chat-hosted arena duels.
//!
//! This crate provides:
//! - A phase-checked battle state machine (challenge, prebattle, combat, finished)
//! - A deterministic combat resolver with injectable randomness
//! - A spectator crowd that fuels random arena events
//! - An in-memory registry with a periodic expiry sweep
//! - Optional AI narration with deterministic fallbacks
//! - Arena persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use arena_core::{Arena, ArenaConfig, RngSource, Stance};
//! use arena_core::battle::{ChannelId, UserId};
//! use arena_core::testing::sample_combatant;
//!
//! let mut arena = Arena::new(ArenaConfig::new().with_max_rounds(3));
//! let id = arena.challenge(ChannelId(1), UserId(1), "Ash", sample_combatant("Ash"))?;
//! arena.accept(id, UserId(2), "Bryn", sample_combatant("Bryn"))?;
//! arena.set_stance(id, UserId(1), Stance::Aggressive)?;
//! arena.set_stance(id, UserId(2), Stance::Deceptive)?;
//!
//! arena.set_action(id, UserId(1), "Power Attack")?;
//! arena.set_action(id, UserId(2), "Strike")?;
//! let report = arena.resolve_round(id, &mut RngSource::from_entropy())?;
//! println!("{}", report.fallback_narrative());
//! ```

pub mod arena;
pub mod battle;
pub mod combat;
pub mod crowd;
pub mod fighter;
pub mod headless;
pub mod narrative;
pub mod persist;
pub mod registry;
pub mod rng;
pub mod state;
pub mod sweep;
pub mod testing;

// Primary public API
pub use arena::{Arena, ArenaConfig, RoundReport};
pub use battle::{Battle, BattleId, Phase, Side};
pub use crowd::{ArenaEvent, SpectatorAction};
pub use fighter::{Combatant, Stance, Stats, StoryData};
pub use headless::{HeadlessConfig, HeadlessDuel};
pub use narrative::{ClaudeNarrator, Narrator, NarratorConfig};
pub use persist::{PersistError, SavedArena};
pub use registry::BattleRegistry;
pub use rng::{RandomSource, RngSource};
pub use state::BattleError;
pub use testing::{MockNarrator, ScriptedRandom, TestHarness};
