use crate::camera::Viewport;
use crate::sprite;
use crate::sync::{ClientContext, ConnectionState};
use log::trace;
use macroquad::prelude::*;
use shared::{Player, CULL_MARGIN, SPRITE_MAX_SIZE};
use std::collections::HashMap;

const BACKGROUND_COLOR: Color = Color::new(0.1, 0.1, 0.1, 1.0);
const LOCAL_COLOR: Color = GREEN;
const REMOTE_COLOR: Color = Color::new(1.0, 68.0 / 255.0, 68.0 / 255.0, 1.0);
const LABEL_BOX_COLOR: Color = Color::new(0.0, 0.0, 0.0, 0.6);
const PLACEHOLDER_RADIUS: f32 = 20.0;
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_PADDING: f32 = 4.0;

/// Pixel dimensions of a decoded image.
pub trait Raster {
    fn width(&self) -> f32;
    fn height(&self) -> f32;
}

impl Raster for Image {
    fn width(&self) -> f32 {
        self.width as f32
    }

    fn height(&self) -> f32 {
        self.height as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blit {
    pub source: Option<Rect>,
    pub dest: Rect,
    pub flip_x: bool,
}

/// 2D raster sink with a top-left origin and y pointing down.
pub trait Surface {
    type Image: Raster;

    fn size(&self) -> Viewport;
    fn clear(&mut self, color: Color);
    /// `key` identifies the image across frames so implementations can keep
    /// uploaded copies.
    fn draw_image(&mut self, key: &str, image: &Self::Image, blit: Blit);
    fn fill_circle(&mut self, x: f32, y: f32, radius: f32, color: Color);
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn measure_text(&self, text: &str, font_size: f32) -> f32;
    fn draw_text(&mut self, text: &str, x: f32, y: f32, font_size: f32, color: Color);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub sprites: usize,
    pub placeholders: usize,
    pub culled: usize,
}

impl FrameStats {
    pub fn visible(&self) -> usize {
        self.sprites + self.placeholders
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    sprite_size: f32,
    cull_margin: f32,
    show_status: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            sprite_size: SPRITE_MAX_SIZE,
            cull_margin: CULL_MARGIN,
            show_status: true,
        }
    }

    pub fn with_status(mut self, show_status: bool) -> Self {
        self.show_status = show_status;
        self
    }

    pub fn render_frame<S: Surface>(
        &mut self,
        surface: &mut S,
        ctx: &ClientContext<S::Image>,
        connection: ConnectionState,
    ) -> FrameStats {
        let viewport = ctx.viewport;
        let mut stats = FrameStats::default();

        surface.clear(BACKGROUND_COLOR);
        self.draw_background(surface, ctx);

        for player in ctx.store.players() {
            let (sx, sy) = ctx.camera.world_to_screen(player.x, player.y);
            if self.is_culled(sx, sy, viewport) {
                stats.culled += 1;
                continue;
            }

            let is_local_player = ctx.store.is_local(&player.id);
            if self.draw_sprite(surface, ctx, player, sx, sy) {
                stats.sprites += 1;
            } else {
                self.draw_placeholder(surface, sx, sy, is_local_player);
                stats.placeholders += 1;
            }

            self.draw_label(surface, player, sx, sy);
        }

        if self.show_status {
            self.draw_status(surface, ctx, connection);
        }

        trace!(
            "Frame: {} sprites, {} placeholders, {} culled",
            stats.sprites,
            stats.placeholders,
            stats.culled
        );
        stats
    }

    fn is_culled(&self, sx: f32, sy: f32, viewport: Viewport) -> bool {
        let m = self.cull_margin;
        sx + m < 0.0 || sx - m > viewport.width || sy + m < 0.0 || sy - m > viewport.height
    }

    fn draw_background<S: Surface>(&self, surface: &mut S, ctx: &ClientContext<S::Image>) {
        let Some(image) = ctx.images.get(&ctx.background) else {
            return;
        };

        let camera = ctx.camera;
        let w = ctx.viewport.width.min(image.width() - camera.x);
        let h = ctx.viewport.height.min(image.height() - camera.y);
        if w <= 0.0 || h <= 0.0 {
            return;
        }

        surface.draw_image(
            &ctx.background,
            image,
            Blit {
                source: Some(Rect::new(camera.x, camera.y, w, h)),
                dest: Rect::new(0.0, 0.0, w, h),
                flip_x: false,
            },
        );
    }

    fn draw_sprite<S: Surface>(
        &self,
        surface: &mut S,
        ctx: &ClientContext<S::Image>,
        player: &Player,
        sx: f32,
        sy: f32,
    ) -> bool {
        let avatar = ctx.store.avatar(&player.avatar);
        let Some(frame) = sprite::resolve(avatar, player.facing, player.animation_frame) else {
            return false;
        };
        let Some(image) = ctx.images.get(frame.asset) else {
            return false;
        };

        let (iw, ih) = (image.width(), image.height());
        if iw <= 0.0 || ih <= 0.0 {
            return false;
        }

        let scale = self.sprite_size / iw.max(ih);
        let (w, h) = (iw * scale, ih * scale);

        surface.draw_image(
            frame.asset,
            image,
            Blit {
                source: None,
                dest: Rect::new(sx - w / 2.0, sy - h / 2.0, w, h),
                flip_x: frame.mirrored,
            },
        );
        true
    }

    fn draw_placeholder<S: Surface>(&self, surface: &mut S, sx: f32, sy: f32, is_local: bool) {
        let color = if is_local { LOCAL_COLOR } else { REMOTE_COLOR };
        surface.fill_circle(sx, sy, PLACEHOLDER_RADIUS, color);
    }

    fn draw_label<S: Surface>(&self, surface: &mut S, player: &Player, sx: f32, sy: f32) {
        let text = if player.username.is_empty() {
            player.id.as_str()
        } else {
            player.username.as_str()
        };

        let text_width = surface.measure_text(text, LABEL_FONT_SIZE);
        let baseline = sy - self.sprite_size / 2.0 - LABEL_PADDING;
        let text_x = sx - text_width / 2.0;

        surface.fill_rect(
            Rect::new(
                text_x - LABEL_PADDING,
                baseline - LABEL_FONT_SIZE,
                text_width + LABEL_PADDING * 2.0,
                LABEL_FONT_SIZE + LABEL_PADDING,
            ),
            LABEL_BOX_COLOR,
        );

        for (dx, dy) in [(-1.0, 0.0), (1.0, 0.0), (0.0, -1.0), (0.0, 1.0)] {
            surface.draw_text(text, text_x + dx, baseline + dy, LABEL_FONT_SIZE, BLACK);
        }
        surface.draw_text(text, text_x, baseline, LABEL_FONT_SIZE, WHITE);
    }

    fn draw_status<S: Surface>(
        &self,
        surface: &mut S,
        ctx: &ClientContext<S::Image>,
        connection: ConnectionState,
    ) {
        let y_start = 10.0;

        let connection_color = match connection {
            ConnectionState::Connected => GREEN,
            ConnectionState::Connecting => YELLOW,
            ConnectionState::Disconnected => RED,
        };
        surface.fill_rect(Rect::new(10.0, y_start, 8.0, 8.0), connection_color);
        surface.draw_text(connection.label(), 22.0, y_start + 8.0, 12.0, WHITE);

        let player_y = y_start + 15.0;
        let player_count = ctx.store.len();
        for i in 0..player_count.min(8) {
            surface.fill_rect(
                Rect::new(10.0 + (i as f32) * 4.0, player_y, 3.0, 3.0),
                Color::from_rgba(0, 170, 255, 255),
            );
        }
        let player_text = format!("{} players", player_count);
        surface.draw_text(&player_text, 45.0, player_y + 3.0, 12.0, WHITE);

        let pending = ctx.images.counts().pending;
        if pending > 0 {
            let loading_text = format!("{} images loading", pending);
            surface.draw_text(&loading_text, 45.0, player_y + 18.0, 12.0, GRAY);
        }
    }
}

/// Draws through macroquad's immediate-mode API. Decoded images are uploaded
/// as textures the first time they are drawn.
#[derive(Default)]
pub struct MacroquadSurface {
    textures: HashMap<String, Texture2D>,
}

impl MacroquadSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Surface for MacroquadSurface {
    type Image = Image;

    fn size(&self) -> Viewport {
        Viewport::new(screen_width(), screen_height())
    }

    fn clear(&mut self, color: Color) {
        clear_background(color);
    }

    fn draw_image(&mut self, key: &str, image: &Image, blit: Blit) {
        let texture = self.textures.entry(key.to_string()).or_insert_with(|| {
            let texture = Texture2D::from_image(image);
            texture.set_filter(FilterMode::Nearest);
            texture
        });

        draw_texture_ex(
            texture,
            blit.dest.x,
            blit.dest.y,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(blit.dest.w, blit.dest.h)),
                source: blit.source,
                flip_x: blit.flip_x,
                ..Default::default()
            },
        );
    }

    fn fill_circle(&mut self, x: f32, y: f32, radius: f32, color: Color) {
        draw_circle(x, y, radius, color);
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        draw_rectangle(rect.x, rect.y, rect.w, rect.h, color);
    }

    fn measure_text(&self, text: &str, font_size: f32) -> f32 {
        measure_text(text, None, font_size as u16, 1.0).width
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, font_size: f32, color: Color) {
        draw_text(text, x, y, font_size, color);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    Image { key: String, blit: Blit },
    Circle { x: f32, y: f32, color: Color },
    Rect { rect: Rect, color: Color },
    Text { text: String, x: f32, y: f32 },
}

/// Headless surface that records every draw call. Text is measured at a
/// fixed advance per character.
#[derive(Debug, Clone)]
pub struct RecordingSurface<I> {
    pub viewport: Viewport,
    pub commands: Vec<DrawCommand>,
    _image: std::marker::PhantomData<I>,
}

impl<I> RecordingSurface<I> {
    pub const CHAR_ADVANCE: f32 = 7.0;

    pub fn new(width: f32, height: f32) -> Self {
        Self {
            viewport: Viewport::new(width, height),
            commands: Vec::new(),
            _image: std::marker::PhantomData,
        }
    }

    pub fn images(&self) -> impl Iterator<Item = (&str, &Blit)> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Image { key, blit } => Some((key.as_str(), blit)),
            _ => None,
        })
    }

    pub fn circles(&self) -> impl Iterator<Item = (f32, f32, Color)> + '_ {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Circle { x, y, color } => Some((*x, *y, *color)),
            _ => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl<I: Raster> Surface for RecordingSurface<I> {
    type Image = I;

    fn size(&self) -> Viewport {
        self.viewport
    }

    fn clear(&mut self, _color: Color) {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear);
    }

    fn draw_image(&mut self, key: &str, _image: &I, blit: Blit) {
        self.commands.push(DrawCommand::Image {
            key: key.to_string(),
            blit,
        });
    }

    fn fill_circle(&mut self, x: f32, y: f32, _radius: f32, color: Color) {
        self.commands.push(DrawCommand::Circle { x, y, color });
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.commands.push(DrawCommand::Rect { rect, color });
    }

    fn measure_text(&self, text: &str, _font_size: f32) -> f32 {
        text.chars().count() as f32 * Self::CHAR_ADVANCE
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, _font_size: f32, _color: Color) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            x,
            y,
        });
    }
}
