//! Canvas, layer, pin, media and share rows.
//!
//! These mirror the remote store's tables one-to-one. Timestamps on rows
//! created locally are provisional until the remote store echoes the row back
//! with its own values.

use crate::error::{CanvasError, CanvasResult};
use chrono::{DateTime, Utc};
use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type CanvasId = Uuid;
pub type LayerId = Uuid;
pub type PinId = Uuid;
pub type MediaId = Uuid;
pub type ShareId = Uuid;
pub type UserId = Uuid;

/// Root aggregate: a background image plus its layers, pins and shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: CanvasId,
    pub title: String,
    /// Reference to the uploaded background image, if any.
    pub background_image: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Canvas {
    pub fn new(title: impl Into<String>, background_image: Option<String>, owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            background_image,
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// RGBA layer color, stored as a CSS hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl LayerColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for LayerColor {
    /// Neutral gray used for markers whose layer color is unknown.
    fn default() -> Self {
        Self::new(0x6b, 0x72, 0x80, 255)
    }
}

impl FromStr for LayerColor {
    type Err = CanvasError;

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CanvasError::InvalidColor(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        match hex.len() {
            3 => Ok(Self::new(
                channel(0..1)? * 17,
                channel(1..2)? * 17,
                channel(2..3)? * 17,
                255,
            )),
            6 => Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Ok(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for LayerColor {
    type Error = CanvasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LayerColor> for String {
    fn from(color: LayerColor) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for LayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<LayerColor> for Color {
    fn from(color: LayerColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// A named, colored, toggleable group of pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub canvas_id: CanvasId,
    pub name: String,
    pub color: LayerColor,
    pub visible: bool,
    /// Position in the layer panel, ascending.
    pub order: u32,
}

/// A positioned annotation bound to one layer.
///
/// `x`/`y` are fractions of the background image extent (see
/// [`CoordinateMapper`](crate::CoordinateMapper)); values outside `0..=1` are
/// kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub canvas_id: CanvasId,
    pub layer_id: LayerId,
    pub x: f64,
    pub y: f64,
    pub title: String,
    pub description: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pin {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Kind of media attached to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Url,
}

impl FromStr for MediaKind {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "url" => Ok(MediaKind::Url),
            other => Err(CanvasError::InvalidMediaKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: MediaId,
    pub pin_id: PinId,
    pub kind: MediaKind,
    pub url: String,
    pub name: Option<String>,
}

/// Media to attach to a pin; ids are assigned when the pin is written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMedia {
    pub kind: MediaKind,
    pub url: String,
    pub name: Option<String>,
}

impl NewMedia {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn attach(self, pin_id: PinId) -> MediaItem {
        MediaItem {
            id: Uuid::new_v4(),
            pin_id,
            kind: self.kind,
            url: self.url,
            name: self.name,
        }
    }
}

/// A pin together with its media, the unit written to the remote store and
/// to the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    #[serde(flatten)]
    pub pin: Pin,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

/// Partial update for a pin. `None` leaves a field untouched; `media`
/// replaces the whole media set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub layer_id: Option<LayerId>,
    pub media: Option<Vec<NewMedia>>,
}

impl PinPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn position(mut self, position: Point) -> Self {
        self.x = Some(position.x);
        self.y = Some(position.y);
        self
    }

    pub fn layer(mut self, layer_id: LayerId) -> Self {
        self.layer_id = Some(layer_id);
        self
    }

    pub fn media(mut self, media: Vec<NewMedia>) -> Self {
        self.media = Some(media);
        self
    }
}

/// Permission a share grants. Owners are never represented by a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Editor,
    Viewer,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Editor => "editor",
            SharePermission::Viewer => "viewer",
        }
    }
}

impl FromStr for SharePermission {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "editor" => Ok(SharePermission::Editor),
            "viewer" => Ok(SharePermission::Viewer),
            other => Err(CanvasError::InvalidPermission(other.to_string())),
        }
    }
}

impl fmt::Display for SharePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant of editor/viewer access on a canvas to a non-owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub canvas_id: CanvasId,
    pub user_id: UserId,
    pub permission: SharePermission,
    pub shared_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Public profile of a user, used to resolve share targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Primary key of a row in one of the synced tables.
///
/// Media rows travel with their pin, so `Pin` also addresses the pin's media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "table", content = "id", rename_all = "lowercase")]
pub enum RowKey {
    Canvas(CanvasId),
    Layer(LayerId),
    Pin(PinId),
    Share(ShareId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Canvas(id) => write!(f, "canvas {}", id),
            RowKey::Layer(id) => write!(f, "layer {}", id),
            RowKey::Pin(id) => write!(f, "pin {}", id),
            RowKey::Share(id) => write!(f, "share {}", id),
        }
    }
}

/// A full row image in one of the synced tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Canvas(Canvas),
    Layer(Layer),
    Pin(PinRecord),
    Share(Share),
}

impl Row {
    pub fn key(&self) -> RowKey {
        match self {
            Row::Canvas(c) => RowKey::Canvas(c.id),
            Row::Layer(l) => RowKey::Layer(l.id),
            Row::Pin(p) => RowKey::Pin(p.pin.id),
            Row::Share(s) => RowKey::Share(s.id),
        }
    }

    /// Canvas the row belongs to.
    pub fn canvas_id(&self) -> CanvasId {
        match self {
            Row::Canvas(c) => c.id,
            Row::Layer(l) => l.canvas_id,
            Row::Pin(p) => p.pin.canvas_id,
            Row::Share(s) => s.canvas_id,
        }
    }

    pub fn into_canvas(self) -> Option<Canvas> {
        match self {
            Row::Canvas(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_layer(self) -> Option<Layer> {
        match self {
            Row::Layer(l) => Some(l),
            _ => None,
        }
    }

    pub fn into_pin(self) -> Option<PinRecord> {
        match self {
            Row::Pin(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_share(self) -> Option<Share> {
        match self {
            Row::Share(s) => Some(s),
            _ => None,
        }
    }
}

/// Validate and normalize a share permission coming from the UI.
pub fn parse_share_permission(value: &str) -> CanvasResult<SharePermission> {
    value.trim().parse()
}
