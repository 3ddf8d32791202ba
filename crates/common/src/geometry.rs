//! Geometric value types and coordinate spaces

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in some coordinate space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub const ZERO: Location = Location { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate by `(dx, dy)`
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }

    /// Translate by another location treated as a vector
    pub fn offset_by(self, by: Location) -> Self {
        self.offset(by.x, by.y)
    }

    pub fn negate(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A width/height pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Scale both dimensions, rounding to the nearest pixel
    pub fn scale(self, ratio: f64) -> Self {
        Self {
            width: (self.width as f64 * ratio).round() as u32,
            height: (self.height as f64 * ratio).round() as u32,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const EMPTY: Region = Region {
        left: 0,
        top: 0,
        width: 0,
        height: 0,
    };

    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn from_parts(location: Location, size: Size) -> Self {
        Self::new(location.x, location.y, size.width, size.height)
    }

    pub fn location(&self) -> Location {
        Location::new(self.left, self.top)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> i32 {
        self.left.saturating_add_unsigned(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.top.saturating_add_unsigned(self.height)
    }

    /// A region with no area
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn with_location(self, location: Location) -> Self {
        Self {
            left: location.x,
            top: location.y,
            ..self
        }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            left: self.left.saturating_add(dx),
            top: self.top.saturating_add(dy),
            ..self
        }
    }

    /// Overlap of two regions; `Region::EMPTY` when they do not overlap
    pub fn intersect(&self, other: &Region) -> Region {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= left || bottom <= top {
            return Region::EMPTY;
        }

        Region::new(left, top, right.abs_diff(left), bottom.abs_diff(top))
    }

    pub fn intersects(&self, other: &Region) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Half-open containment: the right and bottom edges are outside
    pub fn contains(&self, location: Location) -> bool {
        location.x >= self.left
            && location.x < self.right()
            && location.y >= self.top
            && location.y < self.bottom()
    }

    pub fn contains_region(&self, other: &Region) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.left, self.top, self.width, self.height
        )
    }
}

/// The coordinate space a location or region is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatesType {
    /// Raw pixel coordinates of the captured image
    ScreenshotAsIs,
    /// Relative to the current frame, ignoring its scroll offset
    ContextAsIs,
    /// Relative to the current frame, including its scroll offset
    ContextRelative,
}

impl fmt::Display for CoordinatesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatesType::ScreenshotAsIs => write!(f, "SCREENSHOT_AS_IS"),
            CoordinatesType::ContextAsIs => write!(f, "CONTEXT_AS_IS"),
            CoordinatesType::ContextRelative => write!(f, "CONTEXT_RELATIVE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extreme_coordinates_saturate() {
        let far = Region::new(i32::MAX - 1, i32::MIN + 1, 10, 10);
        assert_eq!(far.right(), i32::MAX);
        assert_eq!(far.bottom(), i32::MIN + 11);
        assert_eq!(far.offset(5, -5).location(), Location::new(i32::MAX, i32::MIN));
        assert_eq!(
            Location::new(i32::MIN, 0).offset(-1, 1),
            Location::new(i32::MIN, 1)
        );
        assert!(far.intersect(&Region::new(0, 0, 100, 100)).is_empty());
    }

    #[test]
    fn test_intersect_overlapping() {
        let a = Region::new(0, 0, 100, 100);
        let b = Region::new(50, 60, 100, 100);
        assert_eq!(a.intersect(&b), Region::new(50, 60, 50, 40));
        assert_eq!(b.intersect(&a), Region::new(50, 60, 50, 40));
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), Region::EMPTY);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_intersect_negative_origin() {
        let a = Region::new(-20, -20, 50, 50);
        let b = Region::new(0, 0, 100, 100);
        assert_eq!(a.intersect(&b), Region::new(0, 0, 30, 30));
    }

    #[test]
    fn test_contains_is_half_open() {
        let r = Region::new(10, 10, 5, 5);
        assert!(r.contains(Location::new(10, 10)));
        assert!(r.contains(Location::new(14, 14)));
        assert!(!r.contains(Location::new(15, 14)));
        assert!(!r.contains(Location::new(9, 12)));
    }

    #[test]
    fn test_contains_region() {
        let outer = Region::new(0, 0, 100, 50);
        assert!(outer.contains_region(&Region::new(10, 10, 90, 40)));
        assert!(!outer.contains_region(&Region::new(10, 10, 91, 40)));
    }

    #[test]
    fn test_size_scale_rounds() {
        assert_eq!(Size::new(101, 51).scale(0.5), Size::new(51, 26));
    }

    #[test]
    fn test_coordinates_type_display() {
        assert_eq!(CoordinatesType::ContextRelative.to_string(), "CONTEXT_RELATIVE");
        let json = serde_json::to_string(&CoordinatesType::ScreenshotAsIs).unwrap();
        assert_eq!(json, "\"SCREENSHOT_AS_IS\"");
    }
}
