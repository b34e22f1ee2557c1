// Region tracking helpers

/// A rectangular region
///
/// This can be used to track input regions,
/// clip boxes, etc. It is determined by
/// the corners of a rectangle:
///   r_pos:  the upper left corner's position
///   r_size: the distance from the left to the lower right
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rect<T> {
    pub r_pos: (T, T),
    pub r_size: (T, T),
}

impl<T> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Rect<T> {
        Rect {
            r_pos: (x, y),
            r_size: (width, height),
        }
    }
}

impl Rect<f32> {
    /// Intersect this rect with `clip`, returning None when the
    /// overlap is empty. Used for widget clipping.
    pub fn intersect(&self, clip: &Rect<f32>) -> Option<Rect<f32>> {
        let x0 = crate::partial_max(self.r_pos.0, clip.r_pos.0);
        let y0 = crate::partial_max(self.r_pos.1, clip.r_pos.1);
        let x1 = crate::partial_min(
            self.r_pos.0 + self.r_size.0,
            clip.r_pos.0 + clip.r_size.0,
        );
        let y1 = crate::partial_min(
            self.r_pos.1 + self.r_size.1,
            clip.r_pos.1 + clip.r_size.1,
        );

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Does this region contain the point (x, y)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.r_pos.0
            && x <= self.r_pos.0 + self.r_size.0
            && y >= self.r_pos.1
            && y <= self.r_pos.1 + self.r_size.1
    }

    /// Grow this region to also cover `other`
    pub fn union(&self, other: &Rect<f32>) -> Rect<f32> {
        let x0 = crate::partial_min(self.r_pos.0, other.r_pos.0);
        let y0 = crate::partial_min(self.r_pos.1, other.r_pos.1);
        let x1 = crate::partial_max(
            self.r_pos.0 + self.r_size.0,
            other.r_pos.0 + other.r_size.0,
        );
        let y1 = crate::partial_max(
            self.r_pos.1 + self.r_size.1,
            other.r_pos.1 + other.r_size.1,
        );

        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(&b), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));
    }

    #[test]
    fn intersect_disjoint() {
        let a = Rect::new(0.0, 0.0, 4.0, 4.0);
        let b = Rect::new(5.0, 5.0, 2.0, 2.0);
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn union_covers_both() {
        let a = Rect::new(0.0, 0.0, 4.0, 4.0);
        let b = Rect::new(6.0, 2.0, 2.0, 8.0);
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 8.0, 10.0));
    }
}
