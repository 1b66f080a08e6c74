use bitflags::bitflags;

use crate::geometry::{Point, Rect};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceCapabilities: u8 {
        /// Can hand back its current pixels.
        const SNAPSHOT = 1 << 0;
        /// Accepts wall coordinates and applies its own offset.
        const OFFSET_DRAWING = 1 << 1;
    }
}

pub type Color = [u8; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSnapshot {
    pub width: u32,
    pub height: u32,
    /// RGBA, row major.
    pub data: Vec<u8>,
}

impl SurfaceSnapshot {
    /// Nearest-neighbour resize to `width` pixels across, keeping the aspect
    /// ratio. Snapshots already that narrow are returned unchanged.
    pub fn downscale(&self, width: u32) -> SurfaceSnapshot {
        if width == 0 || self.width <= width || self.height == 0 {
            return self.clone();
        }
        let height = ((width as u64 * self.height as u64) / self.width as u64).max(1) as u32;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height as u64) as usize;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width as u64) as usize;
                let i = (sy * self.width as usize + sx) * 4;
                data.extend_from_slice(&self.data[i..i + 4]);
            }
        }
        SurfaceSnapshot {
            width,
            height,
            data,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface does not support {0}")]
    Unsupported(&'static str),
}

/// Something a client module can render onto. Modules ask for capabilities
/// instead of assuming a concrete surface.
pub trait Surface: Send {
    fn capabilities(&self) -> SurfaceCapabilities;

    /// The part of the wall this surface shows.
    fn virtual_rect(&self) -> Rect;

    fn opacity(&self) -> f64;

    fn set_opacity(&mut self, opacity: f64);

    fn clear(&mut self, color: Color);

    fn fill_rect(&mut self, rect: Rect, color: Color);

    fn fill_circle(&mut self, center: Point, radius: f64, color: Color);

    fn take_snapshot(&self) -> Result<SurfaceSnapshot, SurfaceError> {
        Err(SurfaceError::Unsupported("snapshots"))
    }

    fn supports(&self, capabilities: SurfaceCapabilities) -> bool {
        self.capabilities().contains(capabilities)
    }

    /// Maps a wall coordinate into the space draw calls expect.
    fn to_drawing_space(&self, wall: Point) -> Point {
        if self.supports(SurfaceCapabilities::OFFSET_DRAWING) {
            wall
        } else {
            let rect = self.virtual_rect();
            wall - Point::new(rect.x, rect.y)
        }
    }
}
