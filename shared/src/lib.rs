use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

pub const WORLD_WIDTH: f32 = 2048.0;
pub const WORLD_HEIGHT: f32 = 2048.0;
pub const SPRITE_MAX_SIZE: f32 = 64.0;
pub const CULL_MARGIN: f32 = 50.0;
pub const BACKGROUND_ASSET: &str = "background.png";
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    #[default]
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub facing: Direction,
    #[serde(default)]
    pub animation_frame: usize,
    #[serde(default)]
    pub avatar: String,
}

impl Player {
    pub fn new(id: impl Into<String>, username: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            x,
            y,
            facing: Direction::default(),
            animation_frame: 0,
            avatar: String::new(),
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// Applies only the fields present in `patch`. Returns true if the
    /// position changed.
    pub fn merge(&mut self, patch: &PlayerPatch) -> bool {
        let before = self.position();

        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(facing) = patch.facing {
            self.facing = facing;
        }
        if let Some(frame) = patch.animation_frame {
            self.animation_frame = frame;
        }
        if let Some(username) = &patch.username {
            self.username.clone_from(username);
        }
        if let Some(avatar) = &patch.avatar {
            self.avatar.clone_from(avatar);
        }

        before != self.position()
    }
}

/// Partial player fields carried by `players_moved`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_frame: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PlayerPatch {
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub frames: BTreeMap<Direction, Vec<String>>,
}

impl Avatar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: BTreeMap::new(),
        }
    }

    pub fn with_frames<I, S>(mut self, direction: Direction, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frames
            .insert(direction, frames.into_iter().map(Into::into).collect());
        self
    }

    pub fn frames(&self, direction: Direction) -> Option<&[String]> {
        self.frames.get(&direction).map(Vec::as_slice)
    }

    /// Every frame reference of every direction, in direction order.
    pub fn asset_refs(&self) -> impl Iterator<Item = &str> {
        self.frames.values().flatten().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame { username: String },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinGame(JoinResult),
    PlayerJoined(PlayerJoined),
    PlayersMoved(PlayersMoved),
    PlayerLeft(PlayerLeft),
}

impl ServerMessage {
    const TAGS: [&'static str; 4] = ["join_game", "player_joined", "players_moved", "player_left"];

    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::JoinGame(_) => "join_game",
            ServerMessage::PlayerJoined(_) => "player_joined",
            ServerMessage::PlayersMoved(_) => "players_moved",
            ServerMessage::PlayerLeft(_) => "player_left",
        }
    }

    /// Decodes one text frame. Unknown tags are reported separately from
    /// payloads that fail to parse, and a `join_game` payload that fails to
    /// parse gets its own variant since it ends the join attempt.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        let tag = value
            .get("action")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingTag)?;

        if !Self::TAGS.contains(&tag) {
            return Err(ProtocolError::UnknownTag(tag.to_string()));
        }

        let is_join = tag == "join_game";
        serde_json::from_value(value).map_err(|e| {
            if is_join {
                ProtocolError::MalformedJoin(e)
            } else {
                ProtocolError::Malformed(e)
            }
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub success: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<HashMap<String, Player>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatars: Option<HashMap<String, Avatar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayersMoved {
    pub players: HashMap<String, PlayerPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    #[serde(deserialize_with = "deserialize_id")]
    pub player_id: String,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("malformed join_game payload: {0}")]
    MalformedJoin(#[source] serde_json::Error),
    #[error("message has no `action` tag")]
    MissingTag,
    #[error("unrecognized message tag `{0}`")]
    UnknownTag(String),
}

// Servers send ids either as JSON strings or as bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(u64),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(text) => text,
            WireId::Number(number) => number.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    WireId::deserialize(deserializer).map(String::from)
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireId>::deserialize(deserializer).map(|id| id.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_player_creation() {
        let player = Player::new("1", "alice", 100.0, 200.0);
        assert_eq!(player.id, "1");
        assert_eq!(player.username, "alice");
        assert_approx_eq!(player.x, 100.0);
        assert_approx_eq!(player.y, 200.0);
        assert_eq!(player.facing, Direction::South);
        assert_eq!(player.animation_frame, 0);
    }

    #[test]
    fn test_merge_only_touches_present_fields() {
        let mut player = Player::new("1", "alice", 10.0, 20.0);
        player.facing = Direction::North;
        player.animation_frame = 3;

        let moved = player.merge(&PlayerPatch {
            x: Some(50.0),
            ..PlayerPatch::default()
        });

        assert!(moved);
        assert_approx_eq!(player.x, 50.0);
        assert_approx_eq!(player.y, 20.0);
        assert_eq!(player.facing, Direction::North);
        assert_eq!(player.animation_frame, 3);
        assert_eq!(player.username, "alice");
    }

    #[test]
    fn test_merge_without_position_reports_no_move() {
        let mut player = Player::new("1", "alice", 10.0, 20.0);
        let moved = player.merge(&PlayerPatch {
            facing: Some(Direction::West),
            animation_frame: Some(2),
            ..PlayerPatch::default()
        });

        assert!(!moved);
        assert_eq!(player.facing, Direction::West);
        assert_eq!(player.animation_frame, 2);
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let mut player = Player::new("7", "bob", 1.0, 2.0).with_avatar("knight");
        let before = player.clone();

        assert!(PlayerPatch::default().is_empty());
        player.merge(&PlayerPatch::default());

        assert_eq!(player, before);
    }

    #[test]
    fn test_avatar_asset_refs_cover_every_frame() {
        let avatar = Avatar::new("knight")
            .with_frames(Direction::East, ["e0.png", "e1.png"])
            .with_frames(Direction::South, ["s0.png"]);

        let refs: Vec<&str> = avatar.asset_refs().collect();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&"e1.png"));
        assert!(avatar.frames(Direction::West).is_none());
    }

    #[test]
    fn test_encode_join_request() {
        let message = ClientMessage::JoinGame {
            username: "alice".to_string(),
        };
        let text = message.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["action"], "join_game");
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn test_decode_join_success() {
        let text = r#"{
            "action": "join_game",
            "success": true,
            "playerId": "1",
            "players": {
                "1": {"id": "1", "username": "alice", "x": 100, "y": 100,
                      "facing": "east", "animationFrame": 2, "avatar": "knight"}
            },
            "avatars": {
                "knight": {"name": "knight", "frames": {"east": ["k_e0.png"], "south": ["k_s0.png"]}}
            }
        }"#;

        match ServerMessage::decode(text).unwrap() {
            ServerMessage::JoinGame(result) => {
                assert!(result.success);
                assert_eq!(result.player_id.as_deref(), Some("1"));
                let players = result.players.unwrap();
                let player = &players["1"];
                assert_eq!(player.facing, Direction::East);
                assert_eq!(player.animation_frame, 2);
                let avatars = result.avatars.unwrap();
                assert_eq!(
                    avatars["knight"].frames(Direction::East),
                    Some(&["k_e0.png".to_string()][..])
                );
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_join_failure() {
        let text = r#"{"action": "join_game", "success": false, "error": "name taken"}"#;

        match ServerMessage::decode(text).unwrap() {
            ServerMessage::JoinGame(result) => {
                assert!(!result.success);
                assert_eq!(result.error.as_deref(), Some("name taken"));
                assert!(result.players.is_none());
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_numeric_ids() {
        let text = r#"{"action": "player_left", "playerId": 42}"#;

        match ServerMessage::decode(text).unwrap() {
            ServerMessage::PlayerLeft(left) => assert_eq!(left.player_id, "42"),
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_partial_moves() {
        let text = r#"{"action": "players_moved", "players": {"1": {"x": 50}, "2": {"facing": "west", "animationFrame": 1}}}"#;

        match ServerMessage::decode(text).unwrap() {
            ServerMessage::PlayersMoved(moved) => {
                assert_eq!(moved.players["1"], PlayerPatch {
                    x: Some(50.0),
                    ..PlayerPatch::default()
                });
                assert_eq!(moved.players["2"].facing, Some(Direction::West));
                assert_eq!(moved.players["2"].x, None);
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = ServerMessage::decode(r#"{"action": "chat", "text": "hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTag(tag) if tag == "chat"));
    }

    #[test]
    fn test_decode_missing_tag() {
        let err = ServerMessage::decode(r#"{"players": {}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingTag));
    }

    #[test]
    fn test_decode_malformed_payload() {
        assert!(matches!(
            ServerMessage::decode("not json").unwrap_err(),
            ProtocolError::Malformed(_)
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"action": "player_left"}"#).unwrap_err(),
            ProtocolError::Malformed(_)
        ));
    }

    #[test]
    fn test_decode_malformed_join_payload() {
        for text in [
            r#"{"action": "join_game", "success": true, "playerId": "1",
                "players": {"1": {"id": "1", "x": 0, "y": 0, "facing": "northwest"}}}"#,
            r#"{"action": "join_game", "success": true, "playerId": "1",
                "players": {"1": {"id": "1", "y": 0}}}"#,
            r#"{"action": "join_game", "playerId": "1"}"#,
        ] {
            assert!(matches!(
                ServerMessage::decode(text).unwrap_err(),
                ProtocolError::MalformedJoin(_)
            ));
        }
    }
}
