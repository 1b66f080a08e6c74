use wall::surface::Color;
use wall::{Point, Rect, Surface, SurfaceCapabilities, SurfaceError, SurfaceSnapshot};

/// Software RGBA canvas covering one screen's slice of the wall. Draw calls
/// take wall coordinates and are scaled down into the pixel buffer.
pub struct RasterSurface {
    rect: Rect,
    scale: f64,
    width: u32,
    height: u32,
    opacity: f64,
    pixels: Vec<u8>,
}

impl RasterSurface {
    pub fn new(rect: Rect, scale: f64) -> Self {
        let width = (rect.w * scale).round().max(1.0) as u32;
        let height = (rect.h * scale).round().max(1.0) as u32;
        Self {
            rect,
            scale,
            width,
            height,
            opacity: 1.0,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    #[cfg(test)]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let mut color = [0; 4];
        color.copy_from_slice(&self.pixels[i..i + 4]);
        Some(color)
    }

    fn to_pixels(&self, wall: Point) -> Point {
        (wall - Point::new(self.rect.x, self.rect.y)) * self.scale
    }

    fn blend(&mut self, x: u32, y: u32, color: Color) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let alpha = color[3] as f64 / 255.0 * self.opacity;
        for c in 0..3 {
            let dst = self.pixels[i + c] as f64;
            self.pixels[i + c] = (dst + (color[c] as f64 - dst) * alpha).round() as u8;
        }
        self.pixels[i + 3] = self.pixels[i + 3].max((alpha * 255.0).round() as u8);
    }

    /// Clamped pixel span covering `[lo, hi)` along one axis.
    fn span(lo: f64, hi: f64, limit: u32) -> (u32, u32) {
        let start = lo.floor().clamp(0.0, limit as f64) as u32;
        let end = hi.ceil().clamp(0.0, limit as f64) as u32;
        (start, end)
    }
}

impl Surface for RasterSurface {
    fn capabilities(&self) -> SurfaceCapabilities {
        SurfaceCapabilities::SNAPSHOT | SurfaceCapabilities::OFFSET_DRAWING
    }

    fn virtual_rect(&self) -> Rect {
        self.rect
    }

    fn opacity(&self) -> f64 {
        self.opacity
    }

    fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity;
    }

    /// Replaces the buffer with `color` laid over transparent black at the
    /// current opacity.
    fn clear(&mut self, color: Color) {
        self.pixels.fill(0);
        for y in 0..self.height {
            for x in 0..self.width {
                self.blend(x, y, color);
            }
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let min = self.to_pixels(Point::new(rect.x, rect.y));
        let max = self.to_pixels(Point::new(rect.x + rect.w, rect.y + rect.h));
        let (x0, x1) = Self::span(min.x, max.x, self.width);
        let (y0, y1) = Self::span(min.y, max.y, self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color);
            }
        }
    }

    fn fill_circle(&mut self, center: Point, radius: f64, color: Color) {
        let c = self.to_pixels(center);
        let r = radius * self.scale;
        let (x0, x1) = Self::span(c.x - r, c.x + r, self.width);
        let (y0, y1) = Self::span(c.y - r, c.y + r, self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let p = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                if p.distance_squared(c) <= r * r {
                    self.blend(x, y, color);
                }
            }
        }
    }

    fn take_snapshot(&self) -> Result<SurfaceSnapshot, SurfaceError> {
        Ok(SurfaceSnapshot {
            width: self.width,
            height: self.height,
            data: self.pixels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = [255, 0, 0, 255];

    #[test]
    fn buffer_matches_scaled_rect() {
        let surface = RasterSurface::new(Rect::new(0.0, 0.0, 400.0, 200.0), 0.5);
        assert_eq!(surface.size(), (200, 100));
        let snapshot = surface.take_snapshot().unwrap();
        assert_eq!(snapshot.data.len(), 200 * 100 * 4);
    }

    #[test]
    fn wall_coordinates_are_offset() {
        let mut surface = RasterSurface::new(Rect::new(1000.0, 0.0, 100.0, 100.0), 1.0);
        surface.fill_rect(Rect::new(1010.0, 10.0, 5.0, 5.0), RED);
        assert_eq!(surface.pixel(12, 12), Some(RED));
        assert_eq!(surface.pixel(20, 20), Some([0, 0, 0, 0]));
    }

    #[test]
    fn circles_outside_the_screen_are_clipped() {
        let mut surface = RasterSurface::new(Rect::new(0.0, 0.0, 10.0, 10.0), 1.0);
        surface.fill_circle(Point::new(-50.0, -50.0), 5.0, RED);
        assert!(surface.pixels.iter().all(|&b| b == 0));
        surface.fill_circle(Point::new(5.0, 5.0), 3.0, RED);
        assert_eq!(surface.pixel(5, 5), Some(RED));
        assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn opacity_blends_draws() {
        let mut surface = RasterSurface::new(Rect::new(0.0, 0.0, 4.0, 4.0), 1.0);
        surface.clear([0, 0, 0, 255]);
        surface.set_opacity(0.5);
        surface.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), [200, 100, 0, 255]);
        assert_eq!(surface.pixel(1, 1), Some([100, 50, 0, 255]));
    }

    #[test]
    fn clear_respects_opacity() {
        let mut surface = RasterSurface::new(Rect::new(0.0, 0.0, 4.0, 4.0), 1.0);
        surface.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), RED);
        surface.set_opacity(0.5);
        surface.clear([200, 100, 0, 255]);
        assert_eq!(surface.pixel(3, 3), Some([100, 50, 0, 128]));

        surface.set_opacity(0.0);
        surface.clear([200, 100, 0, 255]);
        assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 0]));
    }
}
