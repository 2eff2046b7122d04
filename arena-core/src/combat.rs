//! Combat resolution.
//!
//! Pure functions that turn two fighters' stats, stances, selected
//! abilities, modifiers and crowd bonuses into a round's outcome. Nothing
//! here mutates a battle; [`crate::state::resolve_round`] applies the result.

use crate::battle::Side;
use crate::fighter::{Ability, BuffKind, DamageType, Fighter, Stance};
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};

/// Maximum random speed jitter added to agility each round.
pub const SPEED_JITTER: f64 = 5.0;

/// Crowd bonus percentages for each side, derived from crowd energy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowdBonus {
    pub red: f64,
    pub blue: f64,
}

impl CrowdBonus {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_side(&self, side: Side) -> f64 {
        match side {
            Side::Red => self.red,
            Side::Blue => self.blue,
        }
    }
}

/// Step-by-step result of one attacker hitting one defender.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageBreakdown {
    pub ability: Ability,
    /// Damage after every multiplier, before defense.
    pub raw: f64,
    /// Amount the defender blocked.
    pub blocked: f64,
    pub critical: bool,
    /// Final integer damage, never below 1.
    pub damage: i32,
}

/// One side's contribution to a resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    pub ability: String,
    pub damage: i32,
    pub critical: bool,
    pub blocked: f64,
    /// The attacker was knocked out before acting.
    pub skipped: bool,
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatResolution {
    pub red: Strike,
    pub blue: Strike,
    pub first: Side,
    /// Short descriptions, used as the fallback narrative.
    pub events: Vec<String>,
}

impl CombatResolution {
    pub fn strike(&self, side: Side) -> &Strike {
        match side {
            Side::Red => &self.red,
            Side::Blue => &self.blue,
        }
    }

    /// Events joined into one line of text.
    pub fn summary(&self) -> String {
        self.events.join(" ")
    }
}

/// Base critical chance in percent for an attacker.
pub fn critical_chance(attacker: &Fighter) -> f64 {
    let mut chance = attacker.stats().luck() as f64 * 0.5;
    if attacker.stance() == Some(Stance::Deceptive) {
        chance += 20.0;
    }
    chance + attacker.modifier(BuffKind::Crit)
}

/// Defense the defender brings against any incoming hit this round.
pub fn block_amount(defender: &Fighter) -> f64 {
    let defense_factor = (1.0 + defender.modifier(BuffKind::Defense) / 100.0).max(0.0);
    let mut blocked = defender.stats().endurance() as f64 * 0.4 * defense_factor;
    if defender.selected_ability().defensive {
        blocked *= 1.3;
    }
    blocked
}

/// Compute damage for `attacker` hitting `defender` with the attacker's
/// selected ability. Draws exactly one value from `rng` for the critical
/// roll.
pub fn calculate_damage(
    attacker: &Fighter,
    defender: &Fighter,
    crowd_bonus_percent: f64,
    rng: &mut dyn RandomSource,
) -> DamageBreakdown {
    let ability = attacker.selected_ability();
    let stats = attacker.stats();

    let base_stat = match ability.damage_type {
        DamageType::Physical => stats.strength(),
        DamageType::Magical => stats.intellect(),
    };
    let mut damage = base_stat as f64 * 0.6;
    damage *= ability.power;

    if stats.agility() > defender.stats().agility() {
        damage *= 1.1;
    }

    damage *= Stance::multiplier(attacker.stance(), defender.stance());
    damage *= 1.0 + crowd_bonus_percent * 0.002;
    damage *= (1.0 + attacker.modifier(BuffKind::Damage) / 100.0).max(0.0);

    let critical = rng.percent(critical_chance(attacker));
    if critical {
        damage *= 1.5;
    }

    let blocked = block_amount(defender);
    let final_damage = ((damage - blocked).max(1.0).round() as i32).max(1);

    DamageBreakdown {
        ability,
        raw: damage,
        blocked,
        critical,
        damage: final_damage,
    }
}

/// Speed roll for a fighter this round.
pub fn roll_speed(fighter: &Fighter, rng: &mut dyn RandomSource) -> f64 {
    let speed_factor = (1.0 + fighter.modifier(BuffKind::Speed) / 100.0).max(0.0);
    fighter.stats().agility() as f64 * speed_factor + rng.range(0.0, SPEED_JITTER)
}

/// Resolve one round between red and blue.
///
/// Draw order: red speed, blue speed, red critical, blue critical. Both
/// strikes are computed before any HP would change; if the side acting
/// first would knock the other out, the second strike is skipped.
pub fn resolve(
    red: &Fighter,
    blue: &Fighter,
    crowd: CrowdBonus,
    rng: &mut dyn RandomSource,
) -> CombatResolution {
    let red_speed = roll_speed(red, rng);
    let blue_speed = roll_speed(blue, rng);
    let first = if blue_speed > red_speed {
        Side::Blue
    } else {
        Side::Red
    };

    let red_hit = calculate_damage(red, blue, crowd.red, rng);
    let blue_hit = calculate_damage(blue, red, crowd.blue, rng);

    let mut red_strike = to_strike(&red_hit);
    let mut blue_strike = to_strike(&blue_hit);

    let (first_fighter, second_fighter) = match first {
        Side::Red => (red, blue),
        Side::Blue => (blue, red),
    };
    let (first_strike, second_strike) = match first {
        Side::Red => (&mut red_strike, &mut blue_strike),
        Side::Blue => (&mut blue_strike, &mut red_strike),
    };

    let mut events = Vec::new();
    events.push(describe_strike(first_fighter, first_strike));

    if second_fighter.hp() - first_strike.damage <= 0 {
        second_strike.damage = 0;
        second_strike.critical = false;
        second_strike.skipped = true;
        events.push(format!(
            "{} falls before striking back!",
            second_fighter.display_name
        ));
    } else {
        events.push(describe_strike(second_fighter, second_strike));
    }

    CombatResolution {
        red: red_strike,
        blue: blue_strike,
        first,
        events,
    }
}

fn to_strike(hit: &DamageBreakdown) -> Strike {
    Strike {
        ability: hit.ability.name.clone(),
        damage: hit.damage,
        critical: hit.critical,
        blocked: hit.blocked,
        skipped: false,
    }
}

fn describe_strike(attacker: &Fighter, strike: &Strike) -> String {
    let crit = if strike.critical { " CRITICAL HIT!" } else { "" };
    format!(
        "{} uses {} for {} damage.{}",
        attacker.display_name, strike.ability, strike.damage, crit
    )
}
