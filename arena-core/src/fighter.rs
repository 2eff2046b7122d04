//! Combatant game data and per-battle fighter state.
//!
//! A [`Combatant`] is the immutable game data a player brings into a fight
//! (stats, optional story data). A [`Fighter`] is that combatant's live
//! state inside one battle: hit points, stance, selected action and timed
//! modifiers.

use crate::battle::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Value used for any base stat a combatant does not define.
pub const DEFAULT_STAT: u32 = 50;

// ============================================================================
// Stats
// ============================================================================

/// Base stats. Absent stats fall back to [`DEFAULT_STAT`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub strength: Option<u32>,
    #[serde(default)]
    pub intellect: Option<u32>,
    #[serde(default)]
    pub agility: Option<u32>,
    #[serde(default)]
    pub endurance: Option<u32>,
    #[serde(default)]
    pub luck: Option<u32>,
}

impl Stats {
    pub fn new(strength: u32, intellect: u32, agility: u32, endurance: u32, luck: u32) -> Self {
        Self {
            strength: Some(strength),
            intellect: Some(intellect),
            agility: Some(agility),
            endurance: Some(endurance),
            luck: Some(luck),
        }
    }

    pub fn strength(&self) -> u32 {
        self.strength.unwrap_or(DEFAULT_STAT)
    }

    pub fn intellect(&self) -> u32 {
        self.intellect.unwrap_or(DEFAULT_STAT)
    }

    pub fn agility(&self) -> u32 {
        self.agility.unwrap_or(DEFAULT_STAT)
    }

    pub fn endurance(&self) -> u32 {
        self.endurance.unwrap_or(DEFAULT_STAT)
    }

    pub fn luck(&self) -> u32 {
        self.luck.unwrap_or(DEFAULT_STAT)
    }

    /// Maximum hit points derived from endurance.
    pub fn max_hp(&self) -> i32 {
        i32::try_from(self.endurance() / 2)
            .unwrap_or(i32::MAX)
            .saturating_add(100)
    }
}

// ============================================================================
// Stances
// ============================================================================

/// Tactical posture chosen before combat.
///
/// Forms a fixed cycle: aggressive beats deceptive, defensive beats
/// aggressive, deceptive beats defensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Aggressive,
    Defensive,
    Deceptive,
}

impl Stance {
    pub fn all() -> [Stance; 3] {
        [Stance::Aggressive, Stance::Defensive, Stance::Deceptive]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stance::Aggressive => "aggressive",
            Stance::Defensive => "defensive",
            Stance::Deceptive => "deceptive",
        }
    }

    /// The stance this one has the advantage over.
    pub fn beats(&self) -> Stance {
        match self {
            Stance::Aggressive => Stance::Deceptive,
            Stance::Defensive => Stance::Aggressive,
            Stance::Deceptive => Stance::Defensive,
        }
    }

    /// Damage multiplier for an attacker in `attacker` stance hitting a
    /// defender in `defender` stance. Unset stances are neutral.
    pub fn multiplier(attacker: Option<Stance>, defender: Option<Stance>) -> f64 {
        match (attacker, defender) {
            (Some(a), Some(d)) if a.beats() == d => 1.2,
            (Some(a), Some(d)) if d.beats() == a => 0.8,
            _ => 1.0,
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aggressive" => Ok(Stance::Aggressive),
            "defensive" => Ok(Stance::Defensive),
            "deceptive" => Ok(Stance::Deceptive),
            other => Err(format!("Unknown stance: {other}")),
        }
    }
}

// ============================================================================
// Abilities
// ============================================================================

/// Which base stat an ability scales from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageType {
    Physical,
    Magical,
}

/// An action a fighter can pick for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    pub name: String,
    pub damage_type: DamageType,
    pub power: f64,
    /// Defensive abilities raise the user's block for the round.
    pub defensive: bool,
}

impl Ability {
    fn builtin(name: &str, power: f64, defensive: bool) -> Self {
        Self {
            name: name.to_string(),
            damage_type: DamageType::Physical,
            power,
            defensive,
        }
    }

    /// An ability taken from a combatant's story data.
    pub fn from_story(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            damage_type: DamageType::Magical,
            power: 1.1,
            defensive: false,
        }
    }
}

/// The generic ability set used when a combatant has no story data.
pub fn builtin_abilities() -> Vec<Ability> {
    vec![
        Ability::builtin("Strike", 1.0, false),
        Ability::builtin("Defend", 0.6, true),
        Ability::builtin("Power Attack", 1.5, false),
    ]
}

/// The ability used when a selection cannot be matched.
pub fn fallback_ability() -> Ability {
    Ability::builtin("Strike", 1.0, false)
}

// ============================================================================
// Combatant game data
// ============================================================================

/// Narrative data attached to a combatant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryData {
    pub faction: Option<String>,
    pub description: Option<String>,
    pub abilities: Vec<String>,
    /// Portrait used as a reference for illustrations.
    #[serde(default)]
    pub image: Option<String>,
}

/// Immutable game data for one combatant, supplied at battle creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub name: String,
    pub stats: Stats,
    #[serde(default)]
    pub story: Option<StoryData>,
}

impl Combatant {
    pub fn new(name: impl Into<String>, stats: Stats) -> Self {
        Self {
            name: name.into(),
            stats,
            story: None,
        }
    }

    pub fn with_story(mut self, story: StoryData) -> Self {
        self.story = Some(story);
        self
    }

    /// Abilities available to this combatant.
    ///
    /// Story abilities replace the built-in set when any are present.
    pub fn abilities(&self) -> Vec<Ability> {
        match &self.story {
            Some(story) if !story.abilities.is_empty() => story
                .abilities
                .iter()
                .map(|name| Ability::from_story(name.as_str()))
                .collect(),
            _ => builtin_abilities(),
        }
    }

    pub fn faction(&self) -> Option<&str> {
        self.story.as_ref().and_then(|s| s.faction.as_deref())
    }

    pub fn reference_image(&self) -> Option<&str> {
        self.story.as_ref().and_then(|s| s.image.as_deref())
    }
}

// ============================================================================
// Buffs
// ============================================================================

/// What a timed modifier affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuffKind {
    Damage,
    Defense,
    Crit,
    Speed,
}

impl BuffKind {
    pub fn all() -> [BuffKind; 4] {
        [BuffKind::Damage, BuffKind::Defense, BuffKind::Crit, BuffKind::Speed]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuffKind::Damage => "damage",
            BuffKind::Defense => "defense",
            BuffKind::Crit => "crit",
            BuffKind::Speed => "speed",
        }
    }
}

/// A timed modifier. Debuffs share the shape with a negative magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buff {
    pub kind: BuffKind,
    pub magnitude: f64,
    pub rounds_remaining: u32,
    pub source: String,
}

impl Buff {
    pub fn new(kind: BuffKind, magnitude: f64, rounds: u32, source: impl Into<String>) -> Self {
        Self {
            kind,
            magnitude,
            rounds_remaining: rounds.max(1),
            source: source.into(),
        }
    }
}

// ============================================================================
// Fighter
// ============================================================================

/// One combatant's state inside a battle.
///
/// Hit points stay within `0..=max_hp`; `max_hp` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fighter {
    pub user_id: UserId,
    pub display_name: String,
    pub combatant: Arc<Combatant>,
    hp: i32,
    max_hp: i32,
    stance: Option<Stance>,
    action: Option<String>,
    buffs: Vec<Buff>,
    debuffs: Vec<Buff>,
}

impl Fighter {
    pub fn new(
        user_id: UserId,
        display_name: impl Into<String>,
        combatant: Arc<Combatant>,
    ) -> Self {
        let max_hp = combatant.stats.max_hp();
        Self {
            user_id,
            display_name: display_name.into(),
            combatant,
            hp: max_hp,
            max_hp,
            stance: None,
            action: None,
            buffs: Vec::new(),
            debuffs: Vec::new(),
        }
    }

    pub fn hp(&self) -> i32 {
        self.hp
    }

    pub fn max_hp(&self) -> i32 {
        self.max_hp
    }

    pub fn stance(&self) -> Option<Stance> {
        self.stance
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn buffs(&self) -> &[Buff] {
        &self.buffs
    }

    pub fn debuffs(&self) -> &[Buff] {
        &self.debuffs
    }

    pub fn stats(&self) -> &Stats {
        &self.combatant.stats
    }

    pub fn is_down(&self) -> bool {
        self.hp <= 0
    }

    pub fn abilities(&self) -> Vec<Ability> {
        self.combatant.abilities()
    }

    /// The ability matching the current selection, or the fallback ability.
    pub fn selected_ability(&self) -> Ability {
        self.action
            .as_deref()
            .and_then(|name| {
                self.abilities()
                    .into_iter()
                    .find(|a| a.name.eq_ignore_ascii_case(name))
            })
            .unwrap_or_else(fallback_ability)
    }

    /// Sum of buff and debuff magnitudes of the given kind, in percent.
    pub fn modifier(&self, kind: BuffKind) -> f64 {
        self.buffs
            .iter()
            .chain(self.debuffs.iter())
            .filter(|b| b.kind == kind)
            .map(|b| b.magnitude)
            .sum()
    }

    pub(crate) fn set_stance(&mut self, stance: Stance) {
        self.stance = Some(stance);
    }

    pub(crate) fn set_action(&mut self, ability: impl Into<String>) {
        self.action = Some(ability.into());
    }

    pub(crate) fn clear_action(&mut self) {
        self.action = None;
    }

    /// Apply damage, clamping at 0. Returns the HP actually removed.
    pub(crate) fn take_damage(&mut self, amount: i32) -> i32 {
        let before = self.hp;
        self.hp = (self.hp - amount.max(0)).clamp(0, self.max_hp);
        before - self.hp
    }

    /// Apply damage that can never drop HP below 1.
    pub(crate) fn take_nonlethal(&mut self, amount: i32) -> i32 {
        let before = self.hp;
        let floor = self.hp.min(1);
        self.hp = (self.hp - amount.max(0)).max(floor);
        before - self.hp
    }

    pub(crate) fn knock_out(&mut self) {
        self.hp = 0;
    }

    /// Add a modifier; negative magnitudes are filed as debuffs.
    pub(crate) fn add_modifier(&mut self, buff: Buff) {
        if buff.magnitude < 0.0 {
            self.debuffs.push(buff);
        } else {
            self.buffs.push(buff);
        }
    }

    /// Decrement every modifier by one round and drop the expired ones.
    pub(crate) fn tick_modifiers(&mut self) {
        for list in [&mut self.buffs, &mut self.debuffs] {
            for buff in list.iter_mut() {
                buff.rounds_remaining = buff.rounds_remaining.saturating_sub(1);
            }
            list.retain(|b| b.rounds_remaining > 0);
        }
    }
}
