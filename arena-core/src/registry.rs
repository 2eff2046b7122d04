//! In-memory battle registry.
//!
//! Indexes battles by id, by each participant's user id and by fight
//! thread. The registry does no locking; hosts serialize access.

use crate::battle::{Battle, BattleId, ChannelId, PhaseTimeouts, ThreadId, UserId};
use crate::crowd::admit_pending;
use crate::fighter::Fighter;
use crate::state::{check_cancel, BattleError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Owns every live battle and its lookup indexes.
#[derive(Debug, Default)]
pub struct BattleRegistry {
    battles: HashMap<BattleId, Battle>,
    by_user: HashMap<UserId, BattleId>,
    by_thread: HashMap<ThreadId, BattleId>,
}

impl BattleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new challenge. Always succeeds; callers check
    /// [`is_user_busy`](Self::is_user_busy) first.
    pub fn create(
        &mut self,
        channel: ChannelId,
        challenger: Fighter,
        max_rounds: u32,
        timeouts: PhaseTimeouts,
        now: DateTime<Utc>,
    ) -> &mut Battle {
        let id = BattleId::new();
        let user = challenger.user_id;
        let battle = Battle::new(id, channel, challenger, max_rounds, timeouts, now);
        self.by_user.insert(user, id);
        info!(battle_id = %id, user_id = %user, "challenge created");
        self.battles.entry(id).or_insert(battle)
    }

    pub fn lookup_by_id(&self, id: BattleId) -> Option<&Battle> {
        self.battles.get(&id)
    }

    pub fn get_mut(&mut self, id: BattleId) -> Option<&mut Battle> {
        self.battles.get_mut(&id)
    }

    pub fn lookup_by_user(&self, user: UserId) -> Option<&Battle> {
        self.by_user.get(&user).and_then(|id| self.battles.get(id))
    }

    pub fn lookup_by_thread(&self, thread: ThreadId) -> Option<&Battle> {
        self.by_thread.get(&thread).and_then(|id| self.battles.get(id))
    }

    /// True if the user is a participant in any battle still registered.
    pub fn is_user_busy(&self, user: UserId) -> bool {
        self.by_user.contains_key(&user)
    }

    /// Index a participant who joined after creation.
    pub fn index_user(&mut self, id: BattleId, user: UserId) -> Result<(), BattleError> {
        if !self.battles.contains_key(&id) {
            return Err(BattleError::NotFound);
        }
        self.by_user.insert(user, id);
        Ok(())
    }

    /// Record the fight thread for a battle and admit pending spectators.
    ///
    /// Returns the number of spectators admitted.
    pub fn attach_thread(&mut self, id: BattleId, thread: ThreadId) -> Result<usize, BattleError> {
        let battle = self.battles.get_mut(&id).ok_or(BattleError::NotFound)?;
        if let Some(old) = battle.thread_id.replace(thread) {
            self.by_thread.remove(&old);
        }
        let admitted = admit_pending(battle);
        self.by_thread.insert(thread, id);
        debug!(battle_id = %id, thread_id = thread.0, admitted, "thread attached");
        Ok(admitted)
    }

    /// Drop a battle and every index entry pointing at it. Idempotent.
    pub fn remove(&mut self, id: BattleId) -> Option<Battle> {
        self.by_user.retain(|_, battle_id| *battle_id != id);
        self.by_thread.retain(|_, battle_id| *battle_id != id);
        let removed = self.battles.remove(&id);
        if removed.is_some() {
            debug!(battle_id = %id, "battle removed");
        }
        removed
    }

    /// Withdraw an unanswered challenge. Only the challenger may do this.
    pub fn cancel_challenge(&mut self, id: BattleId, user: UserId) -> Result<Battle, BattleError> {
        let battle = self.battles.get(&id).ok_or(BattleError::NotFound)?;
        check_cancel(battle, user)?;
        info!(battle_id = %id, user_id = %user, "challenge cancelled");
        self.remove(id).ok_or(BattleError::NotFound)
    }

    /// Evict every unfinished battle past its deadline.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Battle> {
        let expired: Vec<BattleId> = self
            .battles
            .values()
            .filter(|b| b.is_expired(now))
            .map(|b| b.id)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(battle) = self.remove(id) {
                info!(battle_id = %id, phase = %battle.phase(), "battle expired");
                evicted.push(battle);
            }
        }
        evicted
    }

    /// Replace the registry contents with restored battles, rebuilding all
    /// indexes.
    pub fn restore(&mut self, battles: Vec<Battle>) {
        self.battles.clear();
        self.by_user.clear();
        self.by_thread.clear();
        for battle in battles {
            for user in battle.participants() {
                self.by_user.insert(user, battle.id);
            }
            if let Some(thread) = battle.thread_id {
                self.by_thread.insert(thread, battle.id);
            }
            self.battles.insert(battle.id, battle);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Battle> {
        self.battles.values()
    }

    pub fn len(&self) -> usize {
        self.battles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.battles.is_empty()
    }
}
