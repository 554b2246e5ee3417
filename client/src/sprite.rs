//! Resolves a player's facing and animation frame to an avatar asset

use shared::{Avatar, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteFrame<'a> {
    pub asset: &'a str,
    pub mirrored: bool,
}

/// Returns `None` when the avatar has no frame for this request; the caller
/// draws the placeholder marker instead.
///
/// West is the only direction with a fallback: an avatar without west frames
/// reuses its east frames, flipped horizontally.
pub fn resolve<'a>(
    avatar: Option<&'a Avatar>,
    direction: Direction,
    frame_index: usize,
) -> Option<SpriteFrame<'a>> {
    let avatar = avatar?;

    let (frames, mirrored) = match avatar.frames(direction) {
        Some(frames) => (frames, false),
        None if direction == Direction::West => (avatar.frames(Direction::East)?, true),
        None => return None,
    };

    frames.get(frame_index).map(|asset| SpriteFrame {
        asset: asset.as_str(),
        mirrored,
    })
}
