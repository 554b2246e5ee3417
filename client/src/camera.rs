use shared::Player;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSize {
    pub width: f32,
    pub height: f32,
}

impl WorldSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for WorldSize {
    fn default() -> Self {
        Self::new(shared::WORLD_WIDTH, shared::WORLD_HEIGHT)
    }
}

/// World-space offset of the viewport's top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Centres on `local`, clamped so the viewport stays inside the world.
    /// Keeps the previous offset when there is no local player yet.
    pub fn recompute(&mut self, local: Option<&Player>, viewport: Viewport, world: WorldSize) {
        let Some(local) = local else {
            return;
        };

        self.x = clamp_axis(local.x - viewport.width / 2.0, world.width - viewport.width);
        self.y = clamp_axis(local.y - viewport.height / 2.0, world.height - viewport.height);
    }

    pub fn world_to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.x, y - self.y)
    }
}

// A world narrower than the viewport pins the axis to 0 rather than
// handing `f32::clamp` an inverted range (which panics).
fn clamp_axis(value: f32, upper: f32) -> f32 {
    value.clamp(0.0, upper.max(0.0))
}
