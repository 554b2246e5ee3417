//! Connection state machine and inbound message dispatch
//!
//! The controller owns the [`ClientContext`] and is the only writer of the
//! entity store. Every channel event is handled to completion, in arrival
//! order, before the next one.

use crate::camera::{Camera, Viewport, WorldSize};
use crate::images::ImageCache;
use crate::network::ChannelEvent;
use crate::store::{EntityStore, SnapshotError};
use log::{debug, info, warn};
use shared::{
    ClientMessage, JoinResult, PlayerJoined, PlayerLeft, PlayersMoved, ProtocolError, ServerMessage,
};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("server rejected join: {0}")]
    JoinRejected(String),
    #[error("join snapshot rejected: {0}")]
    MalformedSnapshot(#[from] SnapshotError),
    #[error("failed to send: {0}")]
    Send(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Redraw,
    Unchanged,
}

/// Everything the renderer reads.
pub struct ClientContext<I> {
    pub store: EntityStore,
    pub images: ImageCache<I>,
    pub camera: Camera,
    pub viewport: Viewport,
    pub world: WorldSize,
    pub background: String,
}

impl<I> ClientContext<I> {
    pub fn new(images: ImageCache<I>, viewport: Viewport, world: WorldSize, background: String) -> Self {
        Self {
            store: EntityStore::new(),
            images,
            camera: Camera::new(),
            viewport,
            world,
            background,
        }
    }

    fn recompute_camera(&mut self) {
        self.camera
            .recompute(self.store.local_player(), self.viewport, self.world);
    }
}

pub struct SyncController<I> {
    username: String,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<String>,
    context: ClientContext<I>,
}

impl<I> SyncController<I> {
    pub fn new(
        username: impl Into<String>,
        mut context: ClientContext<I>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        let background = context.background.clone();
        context.images.request(&background);

        Self {
            username: username.into(),
            state: ConnectionState::Disconnected,
            outbound,
            context,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn context(&self) -> &ClientContext<I> {
        &self.context
    }

    pub fn store(&self) -> &EntityStore {
        &self.context.store
    }

    /// Marks the start of a connection attempt by the transport.
    pub fn begin_connect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<Update, SyncError> {
        match event {
            ChannelEvent::Connected => {
                info!("Connected, joining as {}", self.username);
                self.state = ConnectionState::Connected;
                self.send(ClientMessage::JoinGame {
                    username: self.username.clone(),
                })?;
                Ok(Update::Redraw)
            }

            ChannelEvent::Message(text) => self.handle_message(&text),

            ChannelEvent::Error(reason) => {
                self.state = ConnectionState::Disconnected;
                Err(SyncError::Connection(reason))
            }

            ChannelEvent::Closed => {
                info!("Connection closed");
                self.state = ConnectionState::Disconnected;
                Ok(Update::Redraw)
            }
        }
    }

    pub fn handle_message(&mut self, text: &str) -> Result<Update, SyncError> {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(ProtocolError::UnknownTag(tag)) => {
                warn!("Ignoring message with unrecognized tag `{}`", tag);
                return Ok(Update::Unchanged);
            }
            Err(ProtocolError::MalformedJoin(e)) => {
                return Err(SyncError::MalformedSnapshot(SnapshotError::Undecodable(
                    e.to_string(),
                )));
            }
            Err(e) => {
                warn!("Dropping message: {}", e);
                return Ok(Update::Unchanged);
            }
        };

        debug!("Received {}", message.tag());

        match message {
            ServerMessage::JoinGame(result) => self.on_join(result),
            ServerMessage::PlayerJoined(joined) => Ok(self.on_player_joined(joined)),
            ServerMessage::PlayersMoved(moved) => Ok(self.on_players_moved(moved)),
            ServerMessage::PlayerLeft(left) => Ok(self.on_player_left(left)),
        }
    }

    pub fn resize(&mut self, viewport: Viewport) -> Update {
        if viewport == self.context.viewport {
            return Update::Unchanged;
        }

        self.context.viewport = viewport;
        self.context.recompute_camera();
        Update::Redraw
    }

    /// Applies finished image loads. Loads complete independently of
    /// messages, so this runs once per frame.
    pub fn poll_images(&mut self) -> Update {
        if self.context.images.poll_completions() > 0 {
            Update::Redraw
        } else {
            Update::Unchanged
        }
    }

    fn on_join(&mut self, result: JoinResult) -> Result<Update, SyncError> {
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(SyncError::JoinRejected(reason));
        }

        self.context.store.apply_join_snapshot(
            result.player_id.unwrap_or_default(),
            result.players.unwrap_or_default(),
            result.avatars.unwrap_or_default(),
        )?;

        let ClientContext { store, images, .. } = &mut self.context;
        for avatar in store.avatars() {
            images.preload_avatar(avatar);
        }
        self.context.recompute_camera();

        info!(
            "Joined as player {} with {} players and {} avatars",
            self.context.store.local_id().unwrap_or_default(),
            self.context.store.len(),
            self.context.store.avatars().count()
        );
        Ok(Update::Redraw)
    }

    fn on_player_joined(&mut self, joined: PlayerJoined) -> Update {
        let PlayerJoined { player, avatar } = joined;
        info!("Player {} ({}) joined", player.id, player.username);

        if let Some(mut avatar) = avatar {
            // A nameless avatar belongs to the player it arrived with.
            if avatar.name.is_empty() {
                avatar.name.clone_from(&player.avatar);
            }

            if avatar.name.is_empty() {
                warn!("Dropping unnamed avatar sent with player {}", player.id);
            } else {
                self.context.images.preload_avatar(&avatar);
                self.context.store.register_avatar(avatar);
            }
        }

        let is_local = self.context.store.is_local(&player.id);
        self.context.store.upsert_player(player);
        if is_local {
            self.context.recompute_camera();
        }
        Update::Redraw
    }

    fn on_players_moved(&mut self, moved: PlayersMoved) -> Update {
        let summary = self.context.store.patch_players(&moved.players);

        if summary.ignored > 0 {
            debug!("{} patches targeted unknown players", summary.ignored);
        }
        if summary.local_moved {
            self.context.recompute_camera();
        }

        if summary.updated > 0 {
            Update::Redraw
        } else {
            Update::Unchanged
        }
    }

    fn on_player_left(&mut self, left: PlayerLeft) -> Update {
        match self.context.store.remove_player(&left.player_id) {
            Some(player) => {
                info!("Player {} ({}) left", player.id, player.username);
                Update::Redraw
            }
            None => {
                debug!("player_left for unknown player {}", left.player_id);
                Update::Unchanged
            }
        }
    }

    fn send(&self, message: ClientMessage) -> Result<(), SyncError> {
        let text = message.encode().map_err(|e| SyncError::Send(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|e| SyncError::Send(e.to_string()))
    }
}
