use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type Point = glam::DVec2;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryError {
    #[error("expected 4 components, got {0}")]
    WrongArity(usize),
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),
    #[error("degenerate rectangle {w}x{h}")]
    Degenerate { w: f64, h: f64 },
}

/// Axis-aligned rectangle in wall coordinates. On the wire it travels as
/// `"x,y,w,h"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn deserialize(s: &str) -> Result<Self, GeometryError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(GeometryError::WrongArity(parts.len()));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| GeometryError::InvalidNumber(part.to_string()))?;
        }

        let [x, y, w, h] = values;
        if w <= 0.0 || h <= 0.0 {
            return Err(GeometryError::Degenerate { w, h });
        }
        Ok(Self { x, y, w, h })
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    pub fn is_inside(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.x + self.w && p.y >= self.y && p.y < self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn scale(&self, sx: f64, sy: f64) -> Rect {
        Rect::new(self.x * sx, self.y * sy, self.w * sx, self.h * sy)
    }

    pub fn translate(&self, p: Point) -> Rect {
        Rect::new(self.x + p.x, self.y + p.y, self.w, self.h)
    }

    pub fn points(&self) -> Vec<Point> {
        vec![
            Point::new(self.x, self.y),
            Point::new(self.x + self.w, self.y),
            Point::new(self.x + self.w, self.y + self.h),
            Point::new(self.x, self.y + self.h),
        ]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.w, self.h)
    }
}

impl FromStr for Rect {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rect::deserialize(s)
    }
}

impl TryFrom<String> for Rect {
    type Error = GeometryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Rect::deserialize(&s)
    }
}

impl From<Rect> for String {
    fn from(rect: Rect) -> Self {
        rect.serialize()
    }
}
