//! The battle aggregate and its supporting types.
//!
//! A [`Battle`] owns both fighters, the crowd state and the round log.
//! Whether a second fighter exists is encoded in [`Stage`], so the
//! prebattle, combat and finished phases always carry two fighters.

use crate::fighter::Fighter;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for battles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BattleId(pub Uuid);

impl BattleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BattleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel the challenge was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// Thread the fight is conducted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

/// Announcement message for the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

// ============================================================================
// Sides and Phases
// ============================================================================

/// One of the two corners. Red is always the challenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Red,
    Blue,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Red => Side::Blue,
            Side::Blue => Side::Red,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Side::Red => "red",
            Side::Blue => "blue",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Position of a battle in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Challenge,
    Prebattle,
    Combat,
    Finished,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Challenge => "challenge",
            Phase::Prebattle => "prebattle",
            Phase::Combat => "combat",
            Phase::Finished => "finished",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Phases that exist only once both fighters are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagedPhase {
    Prebattle,
    Combat,
    Finished,
}

/// Challenge-or-engaged state. Holds the second fighter once accepted.
#[derive(Debug, Clone)]
pub enum Stage {
    Challenge,
    Engaged { blue: Fighter, phase: EngagedPhase },
}

impl Stage {
    pub fn phase(&self) -> Phase {
        match self {
            Stage::Challenge => Phase::Challenge,
            Stage::Engaged { phase, .. } => match phase {
                EngagedPhase::Prebattle => Phase::Prebattle,
                EngagedPhase::Combat => Phase::Combat,
                EngagedPhase::Finished => Phase::Finished,
            },
        }
    }
}

/// Per-phase timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    pub challenge_secs: i64,
    pub prebattle_secs: i64,
    pub round_secs: i64,
}

impl PhaseTimeouts {
    /// How long the given phase may last before the sweep evicts it.
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Challenge => Duration::seconds(self.challenge_secs),
            Phase::Prebattle => Duration::seconds(self.prebattle_secs),
            Phase::Combat | Phase::Finished => Duration::seconds(self.round_secs),
        }
    }
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            challenge_secs: 300,
            prebattle_secs: 180,
            round_secs: 120,
        }
    }
}

// ============================================================================
// Crowd
// ============================================================================

/// Which side the crowd currently favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdBias {
    Red,
    Blue,
    #[default]
    Neutral,
}

/// An admitted spectator of a battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectator {
    pub id: UserId,
    pub cheered_for: Option<Side>,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl Spectator {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            cheered_for: None,
            last_action_at: None,
        }
    }
}

// ============================================================================
// Round Log
// ============================================================================

/// Immutable record of one resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u32,
    pub red_action: String,
    pub blue_action: String,
    pub red_damage: i32,
    pub blue_damage: i32,
    pub red_critical: bool,
    pub blue_critical: bool,
    pub first: Side,
    pub narrative: String,
    pub image: Option<String>,
}

impl RoundResult {
    pub fn damage_by(&self, side: Side) -> i32 {
        match side {
            Side::Red => self.red_damage,
            Side::Blue => self.blue_damage,
        }
    }

    pub fn critical_by(&self, side: Side) -> bool {
        match side {
            Side::Red => self.red_critical,
            Side::Blue => self.blue_critical,
        }
    }

    pub fn any_critical(&self) -> bool {
        self.red_critical || self.blue_critical
    }
}

// ============================================================================
// Battle
// ============================================================================

/// The aggregate root for one duel.
#[derive(Debug, Clone)]
pub struct Battle {
    pub id: BattleId,
    pub channel_id: ChannelId,
    pub announcement_id: Option<MessageId>,
    pub(crate) thread_id: Option<ThreadId>,
    pub(crate) red: Fighter,
    pub(crate) stage: Stage,
    pub(crate) round: u32,
    pub max_rounds: u32,
    pub(crate) pending_spectators: HashSet<UserId>,
    pub(crate) spectators: HashMap<UserId, Spectator>,
    pub(crate) crowd_energy: u32,
    pub(crate) crowd_bias: CrowdBias,
    pub(crate) log: Vec<RoundResult>,
    pub timeouts: PhaseTimeouts,
    pub created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) round_started_at: Option<DateTime<Utc>>,
}

impl Battle {
    pub(crate) fn new(
        id: BattleId,
        channel_id: ChannelId,
        red: Fighter,
        max_rounds: u32,
        timeouts: PhaseTimeouts,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            channel_id,
            announcement_id: None,
            thread_id: None,
            red,
            stage: Stage::Challenge,
            round: 0,
            max_rounds: max_rounds.max(1),
            pending_spectators: HashSet::new(),
            spectators: HashMap::new(),
            crowd_energy: 0,
            crowd_bias: CrowdBias::Neutral,
            log: Vec::new(),
            timeouts,
            created_at: now,
            expires_at: now + timeouts.for_phase(Phase::Challenge),
            round_started_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.stage.phase()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    pub fn red(&self) -> &Fighter {
        &self.red
    }

    pub fn blue(&self) -> Option<&Fighter> {
        match &self.stage {
            Stage::Challenge => None,
            Stage::Engaged { blue, .. } => Some(blue),
        }
    }

    pub fn fighter(&self, side: Side) -> Option<&Fighter> {
        match side {
            Side::Red => Some(&self.red),
            Side::Blue => self.blue(),
        }
    }

    /// Both fighters, once the challenge has been accepted.
    pub fn duel(&self) -> Option<(&Fighter, &Fighter)> {
        self.blue().map(|blue| (&self.red, blue))
    }

    pub(crate) fn fighter_mut(&mut self, side: Side) -> Option<&mut Fighter> {
        match side {
            Side::Red => Some(&mut self.red),
            Side::Blue => match &mut self.stage {
                Stage::Challenge => None,
                Stage::Engaged { blue, .. } => Some(blue),
            },
        }
    }

    pub(crate) fn duel_mut(&mut self) -> Option<(&mut Fighter, &mut Fighter)> {
        match &mut self.stage {
            Stage::Challenge => None,
            Stage::Engaged { blue, .. } => Some((&mut self.red, blue)),
        }
    }

    /// Every fighter currently present, red first.
    pub(crate) fn fighters_mut(&mut self) -> Vec<&mut Fighter> {
        match &mut self.stage {
            Stage::Challenge => vec![&mut self.red],
            Stage::Engaged { blue, .. } => vec![&mut self.red, blue],
        }
    }

    pub(crate) fn set_engaged_phase(&mut self, next: EngagedPhase) {
        if let Stage::Engaged { phase, .. } = &mut self.stage {
            *phase = next;
        }
    }

    /// Which side a user fights on, if any.
    pub fn side_of(&self, user: UserId) -> Option<Side> {
        if self.red.user_id == user {
            Some(Side::Red)
        } else if self.blue().is_some_and(|b| b.user_id == user) {
            Some(Side::Blue)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.side_of(user).is_some()
    }

    pub fn participants(&self) -> Vec<UserId> {
        let mut users = vec![self.red.user_id];
        if let Some(blue) = self.blue() {
            users.push(blue.user_id);
        }
        users
    }

    pub fn crowd_energy(&self) -> u32 {
        self.crowd_energy
    }

    pub fn crowd_bias(&self) -> CrowdBias {
        self.crowd_bias
    }

    pub fn spectators(&self) -> &HashMap<UserId, Spectator> {
        &self.spectators
    }

    pub fn pending_spectators(&self) -> &HashSet<UserId> {
        &self.pending_spectators
    }

    pub fn is_spectator(&self, user: UserId) -> bool {
        self.spectators.contains_key(&user)
    }

    pub fn log(&self) -> &[RoundResult] {
        &self.log
    }

    pub fn last_round(&self) -> Option<&RoundResult> {
        self.log.last()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn round_started_at(&self) -> Option<DateTime<Utc>> {
        self.round_started_at
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == Phase::Finished
    }

    /// True if the battle is still live and past its phase deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_finished() && now > self.expires_at
    }

    /// Restart the deadline for the current phase.
    pub(crate) fn reset_expiry(&mut self, now: DateTime<Utc>) {
        self.expires_at = now + self.timeouts.for_phase(self.phase());
    }

    /// True when both fighters have selected an action this round.
    pub fn both_actions_ready(&self) -> bool {
        self.phase() == Phase::Combat
            && self
                .duel()
                .is_some_and(|(red, blue)| red.action().is_some() && blue.action().is_some())
    }

    /// Critical hits landed by a side over the whole log.
    pub fn critical_hits(&self, side: Side) -> usize {
        self.log.iter().filter(|r| r.critical_by(side)).count()
    }

    /// Portraits of both fighters, red first.
    pub fn reference_images(&self) -> Vec<String> {
        std::iter::once(self.red())
            .chain(self.blue())
            .filter_map(|f| f.combatant.reference_image())
            .map(str::to_string)
            .collect()
    }

    /// Total damage dealt by a side over the whole log.
    pub fn total_damage(&self, side: Side) -> i32 {
        self.log.iter().map(|r| r.damage_by(side)).sum()
    }

    /// Replace the display text and image of a logged round. Returns false
    /// if no such round was logged.
    pub(crate) fn annotate_round(&mut self, round: u32, narrative: String, image: Option<String>) -> bool {
        match self.log.iter_mut().find(|r| r.round == round) {
            Some(result) => {
                result.narrative = narrative;
                if image.is_some() {
                    result.image = image;
                }
                true
            }
            None => false,
        }
    }
}
