//! Client-side mirror of the server's players and avatars

use log::debug;
use shared::{Avatar, Player, PlayerPatch};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("join snapshot could not be decoded: {0}")]
    Undecodable(String),
    #[error("join snapshot has an empty local player id")]
    EmptyLocalId,
    #[error("player entry `{key}` carries mismatched id `{id}`")]
    PlayerIdMismatch { key: String, id: String },
    #[error("avatar entry `{key}` carries mismatched name `{name}`")]
    AvatarNameMismatch { key: String, name: String },
}

/// Result of applying one `players_moved` batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSummary {
    pub updated: usize,
    pub ignored: usize,
    pub local_moved: bool,
}

/// Owns every `Player` and `Avatar` record. Callers only receive shared
/// references; all mutation goes through the update methods.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    local_id: Option<String>,
    players: BTreeMap<String, Player>,
    avatars: HashMap<String, Avatar>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all players and avatars. Validation runs before anything is
    /// touched, so a rejected snapshot leaves the store as it was.
    pub fn apply_join_snapshot(
        &mut self,
        local_id: String,
        players: HashMap<String, Player>,
        avatars: HashMap<String, Avatar>,
    ) -> Result<(), SnapshotError> {
        if local_id.is_empty() {
            return Err(SnapshotError::EmptyLocalId);
        }

        let mut next_players = BTreeMap::new();
        for (key, mut player) in players {
            if player.id.is_empty() {
                player.id.clone_from(&key);
            } else if player.id != key {
                return Err(SnapshotError::PlayerIdMismatch { key, id: player.id });
            }
            next_players.insert(key, player);
        }

        let mut next_avatars = HashMap::with_capacity(avatars.len());
        for (key, mut avatar) in avatars {
            if avatar.name.is_empty() {
                avatar.name.clone_from(&key);
            } else if avatar.name != key {
                return Err(SnapshotError::AvatarNameMismatch {
                    key,
                    name: avatar.name,
                });
            }
            next_avatars.insert(key, avatar);
        }

        self.local_id = Some(local_id);
        self.players = next_players;
        self.avatars = next_avatars;
        Ok(())
    }

    pub fn upsert_player(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn patch_players(&mut self, patches: &HashMap<String, PlayerPatch>) -> PatchSummary {
        let mut summary = PatchSummary::default();

        for (id, patch) in patches {
            match self.players.get_mut(id) {
                Some(player) => {
                    let moved = player.merge(patch);
                    summary.updated += 1;
                    if moved && self.local_id.as_deref() == Some(id.as_str()) {
                        summary.local_moved = true;
                    }
                }
                None => {
                    debug!("Ignoring patch for unknown player {} (no player_joined seen)", id);
                    summary.ignored += 1;
                }
            }
        }

        summary
    }

    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        self.players.remove(id)
    }

    pub fn register_avatar(&mut self, avatar: Avatar) {
        self.avatars.insert(avatar.name.clone(), avatar);
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    /// Players in ascending id order, which is also draw order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn avatar(&self, name: &str) -> Option<&Avatar> {
        self.avatars.get(name)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.local_id.as_deref().and_then(|id| self.players.get(id))
    }

    pub fn is_local(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
