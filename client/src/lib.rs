//! # World Viewer Client Library
//!
//! This library implements the client side of the multiplayer world viewer.
//! It keeps a local mirror of the authoritative server state (players,
//! avatars and their positions) and renders a scrolling viewport onto that
//! mirror every frame.
//!
//! ## Architecture Overview
//!
//! All mutation and drawing happens on the render thread. Network I/O and
//! image loading run on a tokio runtime and talk to the render thread only
//! through channels, so the entity store and image cache never need locks.
//!
//! ```text
//! websocket task ──ChannelEvent──▶ SyncController ──▶ EntityStore
//!                                        │                 │
//! image loads ──completions──▶ ImageCache │                 │
//!                                   │     ▼                 ▼
//!                                   └──▶ Renderer ◀── Camera
//! ```
//!
//! ## Module Organization
//!
//! ### Store Module (`store`)
//! Player and avatar records keyed by id and name, with join snapshots,
//! upserts, field-by-field patches and removals.
//!
//! ### Sprite Module (`sprite`)
//! Maps an avatar, facing and animation frame to an asset reference,
//! mirroring east frames for avatars that have no west frames.
//!
//! ### Images Module (`images`)
//! At-most-once asynchronous image loading with Pending, Ready and Failed
//! entries polled by the renderer.
//!
//! ### Camera Module (`camera`)
//! Viewport offset centred on the local player and clamped to the world.
//!
//! ### Rendering Module (`rendering`)
//! Background, culled entities, sprite or placeholder, name labels and a
//! status overlay, drawn onto any [`rendering::Surface`].
//!
//! ### Sync Module (`sync`)
//! Connection state machine and dispatch of inbound server messages.
//!
//! ### Network Module (`network`)
//! Websocket connection task producing [`network::ChannelEvent`]s.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::camera::{Viewport, WorldSize};
//! use client::images::{FileLoader, ImageCache};
//! use client::network::{spawn_connection, ConnectionConfig};
//! use client::rendering::{MacroquadSurface, Renderer};
//! use client::sync::{ClientContext, SyncController};
//! use tokio::sync::mpsc;
//!
//! # async fn frame_loop() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Runtime::new()?;
//! let images = ImageCache::new(Box::new(FileLoader::new("assets", runtime.handle().clone())));
//! let context = ClientContext::new(
//!     images,
//!     Viewport::new(800.0, 600.0),
//!     WorldSize::default(),
//!     "background.png".to_string(),
//! );
//!
//! let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
//! let mut controller = SyncController::new("alice", context, outbound_tx);
//! controller.begin_connect();
//! let mut events = spawn_connection(
//!     runtime.handle(),
//!     ConnectionConfig::new("ws://127.0.0.1:8080"),
//!     outbound_rx,
//! );
//!
//! let mut renderer = Renderer::new();
//! let mut surface = MacroquadSurface::new();
//! loop {
//!     while let Ok(event) = events.try_recv() {
//!         controller.handle_event(event)?;
//!     }
//!     controller.poll_images();
//!     renderer.render_frame(&mut surface, controller.context(), controller.state());
//!     macroquad::window::next_frame().await;
//! }
//! # }
//! ```

pub mod camera;
pub mod images;
pub mod network;
pub mod rendering;
pub mod sprite;
pub mod store;
pub mod sync;
