//! Arena persistence between process restarts.
//!
//! Battles are flattened into [`BattleRecord`]s: the phase becomes a plain
//! tag with an optional blue fighter, and the spectator set and map become
//! ordered lists. Loading validates the record before rebuilding a
//! [`Battle`].

use crate::battle::{
    Battle, BattleId, ChannelId, CrowdBias, EngagedPhase, MessageId, Phase, PhaseTimeouts,
    RoundResult, Spectator, Stage, ThreadId, UserId,
};
use crate::crowd::MAX_CROWD_ENERGY;
use crate::fighter::Fighter;
use crate::registry::BattleRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// Plain, serializable form of a [`Battle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleRecord {
    pub id: BattleId,
    pub channel_id: ChannelId,
    pub announcement_id: Option<MessageId>,
    pub thread_id: Option<ThreadId>,
    pub phase: Phase,
    pub round: u32,
    pub max_rounds: u32,
    pub red: Fighter,
    pub blue: Option<Fighter>,
    /// Spectators waiting for the fight thread, sorted by id.
    pub pending_spectators: Vec<UserId>,
    /// Admitted spectators as `(id, state)` pairs, sorted by id.
    pub spectators: Vec<(UserId, Spectator)>,
    pub crowd_energy: u32,
    pub crowd_bias: CrowdBias,
    pub log: Vec<RoundResult>,
    pub timeouts: PhaseTimeouts,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub round_started_at: Option<DateTime<Utc>>,
}

impl From<&Battle> for BattleRecord {
    fn from(battle: &Battle) -> Self {
        let mut pending_spectators: Vec<UserId> =
            battle.pending_spectators.iter().copied().collect();
        pending_spectators.sort();

        let mut spectators: Vec<(UserId, Spectator)> = battle
            .spectators
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        spectators.sort_by_key(|(id, _)| *id);

        Self {
            id: battle.id,
            channel_id: battle.channel_id,
            announcement_id: battle.announcement_id,
            thread_id: battle.thread_id,
            phase: battle.phase(),
            round: battle.round,
            max_rounds: battle.max_rounds,
            red: battle.red.clone(),
            blue: battle.blue().cloned(),
            pending_spectators,
            spectators,
            crowd_energy: battle.crowd_energy,
            crowd_bias: battle.crowd_bias,
            log: battle.log.clone(),
            timeouts: battle.timeouts,
            created_at: battle.created_at,
            expires_at: battle.expires_at,
            round_started_at: battle.round_started_at,
        }
    }
}

fn check_fighter(fighter: &Fighter) -> Result<(), PersistError> {
    if fighter.hp() < 0 || fighter.hp() > fighter.max_hp() {
        return Err(PersistError::InvalidFormat(format!(
            "{} has {} HP of {}",
            fighter.display_name,
            fighter.hp(),
            fighter.max_hp()
        )));
    }
    Ok(())
}

impl TryFrom<BattleRecord> for Battle {
    type Error = PersistError;

    fn try_from(record: BattleRecord) -> Result<Self, Self::Error> {
        let stage = match (record.phase, record.blue) {
            (Phase::Challenge, None) => Stage::Challenge,
            (Phase::Challenge, Some(_)) => {
                return Err(PersistError::InvalidFormat(
                    "challenge phase with a blue fighter".to_string(),
                ))
            }
            (_, None) => {
                return Err(PersistError::InvalidFormat(format!(
                    "{} phase without a blue fighter",
                    record.phase
                )))
            }
            (phase, Some(blue)) => {
                check_fighter(&blue)?;
                let phase = match phase {
                    Phase::Prebattle => EngagedPhase::Prebattle,
                    Phase::Combat => EngagedPhase::Combat,
                    _ => EngagedPhase::Finished,
                };
                Stage::Engaged { blue, phase }
            }
        };
        check_fighter(&record.red)?;

        if record.crowd_energy > MAX_CROWD_ENERGY {
            return Err(PersistError::InvalidFormat(format!(
                "crowd energy {} out of range",
                record.crowd_energy
            )));
        }

        Ok(Battle {
            id: record.id,
            channel_id: record.channel_id,
            announcement_id: record.announcement_id,
            thread_id: record.thread_id,
            red: record.red,
            stage,
            round: record.round,
            max_rounds: record.max_rounds.max(1),
            pending_spectators: record.pending_spectators.into_iter().collect(),
            spectators: record.spectators.into_iter().collect(),
            crowd_energy: record.crowd_energy,
            crowd_bias: record.crowd_bias,
            log: record.log,
            timeouts: record.timeouts,
            created_at: record.created_at,
            expires_at: record.expires_at,
            round_started_at: record.round_started_at,
        })
    }
}

/// A saved arena with every live battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedArena {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: DateTime<Utc>,

    pub battles: Vec<BattleRecord>,
}

impl SavedArena {
    /// Snapshot every battle in the registry.
    pub fn from_registry(registry: &BattleRegistry) -> Self {
        let mut battles: Vec<BattleRecord> = registry.iter().map(BattleRecord::from).collect();
        battles.sort_by_key(|b| b.created_at);
        Self {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            battles,
        }
    }

    /// Rebuild battles, rejecting the whole save if any record is invalid.
    pub fn into_battles(self) -> Result<Vec<Battle>, PersistError> {
        self.battles.into_iter().map(Battle::try_from).collect()
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crowd::join_spectators;
    use crate::fighter::{Combatant, Stance, Stats};
    use crate::state::{accept_challenge, set_stance};
    use std::sync::Arc;

    fn fighter(user: u64) -> Fighter {
        Fighter::new(
            UserId(user),
            format!("F{user}"),
            Arc::new(Combatant::new("Bot", Stats::new(60, 40, 55, 70, 20))),
        )
    }

    fn combat_battle() -> Battle {
        let now = Utc::now();
        let mut battle = Battle::new(
            BattleId::new(),
            ChannelId(3),
            fighter(1),
            5,
            PhaseTimeouts::default(),
            now,
        );
        join_spectators(&mut battle, UserId(30)).unwrap();
        accept_challenge(&mut battle, fighter(2), now).unwrap();
        battle.thread_id = Some(ThreadId(44));
        join_spectators(&mut battle, UserId(31)).unwrap();
        set_stance(&mut battle, UserId(1), Stance::Aggressive, now).unwrap();
        set_stance(&mut battle, UserId(2), Stance::Deceptive, now).unwrap();
        battle.crowd_energy = 35;
        battle
    }

    #[test]
    fn test_record_lists_are_sorted() {
        let mut battle = combat_battle();
        battle.spectators.insert(UserId(5), Spectator::new(UserId(5)));
        let record = BattleRecord::from(&battle);
        assert_eq!(record.pending_spectators, vec![UserId(30)]);
        let ids: Vec<UserId> = record.spectators.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![UserId(5), UserId(31)]);
    }

    #[test]
    fn test_record_round_trip_preserves_state() {
        let battle = combat_battle();
        let record = BattleRecord::from(&battle);
        let json = serde_json::to_string(&record).unwrap();
        let record: BattleRecord = serde_json::from_str(&json).unwrap();
        let restored = Battle::try_from(record).unwrap();

        assert_eq!(restored.id, battle.id);
        assert_eq!(restored.phase(), Phase::Combat);
        assert_eq!(restored.round(), 1);
        assert_eq!(restored.participants(), battle.participants());
        assert_eq!(restored.red().hp(), battle.red().hp());
        assert_eq!(restored.blue().map(|f| f.hp()), battle.blue().map(|f| f.hp()));
        assert_eq!(restored.pending_spectators(), battle.pending_spectators());
        assert_eq!(restored.spectators(), battle.spectators());
        assert_eq!(restored.crowd_energy(), 35);
        assert_eq!(restored.red().stance(), Some(Stance::Aggressive));
    }

    #[test]
    fn test_missing_blue_rejected() {
        let mut record = BattleRecord::from(&combat_battle());
        record.blue = None;
        assert!(matches!(
            Battle::try_from(record),
            Err(PersistError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_blue_in_challenge_rejected() {
        let mut record = BattleRecord::from(&combat_battle());
        record.phase = Phase::Challenge;
        assert!(Battle::try_from(record).is_err());
    }

    #[test]
    fn test_energy_out_of_range_rejected() {
        let mut record = BattleRecord::from(&combat_battle());
        record.crowd_energy = 140;
        assert!(Battle::try_from(record).is_err());
    }

    #[tokio::test]
    async fn test_saved_arena_save_and_load() {
        use tempfile::TempDir;

        let mut registry = BattleRegistry::new();
        registry.restore(vec![combat_battle()]);
        let saved = SavedArena::from_registry(&registry);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("arena.json");
        saved.save_json(&path).await.unwrap();

        let loaded = SavedArena::load_json(&path).await.unwrap();
        assert_eq!(loaded.version, SAVE_VERSION);
        let battles = loaded.into_battles().unwrap();
        assert_eq!(battles.len(), 1);
        assert_eq!(battles[0].thread_id(), Some(ThreadId(44)));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.json");
        let mut saved = SavedArena::from_registry(&BattleRegistry::new());
        saved.version = 99;
        saved.save_json(&path).await.unwrap();

        match SavedArena::load_json(&path).await {
            Err(PersistError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SAVE_VERSION);
                assert_eq!(found, 99);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }
}
