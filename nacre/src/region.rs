// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Integer region algebra.
//!
//! A region is a set of pixels represented as disjoint, axis-aligned,
//! half-open rectangles. The representation is not canonical; comparisons
//! go through set semantics rather than the rectangle list.

use crate::transform::{Matrix, Transform};

/// Bound used for the "everything" region, far enough out for any scene
/// while leaving headroom for translations.
const REGION_BOUND: i32 = 1 << 30;

/// A half-open rectangle: `x1 <= x < x2`, `y1 <= y < y2`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_size(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };

        (!r.is_empty()).then_some(r)
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x1 >= self.x1
                && other.y1 >= self.y1
                && other.x2 <= self.x2
                && other.y2 <= self.y2)
    }

    /// The parts of `self` not covered by `clip`, in band order.
    fn subtract(&self, clip: &Rect, out: &mut Vec<Rect>) {
        let Some(overlap) = self.intersection(clip) else {
            out.push(*self);
            return;
        };

        if overlap.y1 > self.y1 {
            out.push(Rect::new(self.x1, self.y1, self.x2, overlap.y1));
        }
        if overlap.x1 > self.x1 {
            out.push(Rect::new(self.x1, overlap.y1, overlap.x1, overlap.y2));
        }
        if overlap.x2 < self.x2 {
            out.push(Rect::new(overlap.x2, overlap.y1, self.x2, overlap.y2));
        }
        if overlap.y2 < self.y2 {
            out.push(Rect::new(self.x1, overlap.y2, self.x2, self.y2));
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Containment {
    In,
    Out,
    Part,
}

#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            Self::new()
        } else {
            Self { rects: vec![rect] }
        }
    }

    /// The region covering everything, used as the default input region.
    pub fn infinite() -> Self {
        Self::from_rect(Rect::new(
            -REGION_BOUND,
            -REGION_BOUND,
            REGION_BOUND,
            REGION_BOUND,
        ))
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// The bounding box of the region; empty rect if the region is empty.
    pub fn extents(&self) -> Rect {
        let mut iter = self.rects.iter();
        let Some(first) = iter.next() else {
            return Rect::default();
        };

        iter.fold(*first, |acc, r| Rect {
            x1: acc.x1.min(r.x1),
            y1: acc.y1.min(r.y1),
            x2: acc.x2.max(r.x2),
            y2: acc.y2.max(r.y2),
        })
    }

    pub fn union_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        // Only the uncovered pieces of the new rect are added, keeping the
        // list disjoint.
        let mut pending = vec![rect];
        for existing in &self.rects {
            if pending.is_empty() {
                return;
            }

            let mut next = Vec::with_capacity(pending.len());
            for piece in &pending {
                piece.subtract(existing, &mut next);
            }
            pending = next;
        }

        self.rects.extend(pending);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        let mut out = Vec::with_capacity(self.rects.len());
        for r in &self.rects {
            r.subtract(&rect, &mut out);
        }
        self.rects = out;
    }

    pub fn subtract(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract_rect(*rect);
        }
    }

    pub fn intersect_rect(&mut self, rect: Rect) {
        self.rects = self
            .rects
            .iter()
            .filter_map(|r| r.intersection(&rect))
            .collect();
    }

    pub fn intersect(&mut self, other: &Region) {
        let mut out = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(r) = a.intersection(b) {
                    out.push(r);
                }
            }
        }
        self.rects = out;
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for r in &mut self.rects {
            *r = r.translated(dx, dy);
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    pub fn contains_rect(&self, rect: &Rect) -> Containment {
        if rect.is_empty() {
            return Containment::In;
        }

        let mut pending = vec![*rect];
        let mut clipped_any = false;

        for existing in &self.rects {
            let mut next = Vec::with_capacity(pending.len());
            for piece in &pending {
                let before = next.len();
                piece.subtract(existing, &mut next);
                if next.len() - before != 1 || next[before] != *piece {
                    clipped_any = true;
                }
            }
            pending = next;

            if pending.is_empty() {
                return Containment::In;
            }
        }

        if clipped_any {
            Containment::Part
        } else {
            Containment::Out
        }
    }

    pub fn overlaps_rect(&self, rect: &Rect) -> bool {
        self.contains_rect(rect) != Containment::Out
    }

    /// Transforms the region through a matrix. Each rectangle's corners are
    /// pushed through the matrix and the bounding boxes unioned, so rotated
    /// regions grow to their axis-aligned hulls.
    pub fn transform(&mut self, matrix: &Matrix) {
        if matrix.is_identity() {
            return;
        }

        if matrix.is_translation() {
            let (tx, ty) = matrix.translation();
            if tx.fract() == 0.0 && ty.fract() == 0.0 {
                self.translate(tx as i32, ty as i32);
                return;
            }
        }

        let mut result = Region::new();
        for r in &self.rects {
            let corners = [
                matrix.transform_point(r.x1 as f64, r.y1 as f64),
                matrix.transform_point(r.x2 as f64, r.y1 as f64),
                matrix.transform_point(r.x2 as f64, r.y2 as f64),
                matrix.transform_point(r.x1 as f64, r.y2 as f64),
            ];

            let mut min = corners[0];
            let mut max = corners[0];
            for (x, y) in &corners[1..] {
                min.0 = min.0.min(*x);
                min.1 = min.1.min(*y);
                max.0 = max.0.max(*x);
                max.1 = max.1.max(*y);
            }

            result.union_rect(Rect::new(
                min.0.floor() as i32,
                min.1.floor() as i32,
                max.0.ceil() as i32,
                max.1.ceil() as i32,
            ));
        }

        *self = result;
    }

    /// Maps a region from global space into output-local pixel space: shift
    /// to the output origin, apply the output transform over the logical
    /// `w x h` rectangle, then scale.
    pub fn to_output_local(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        transform: Transform,
        scale: i32,
    ) {
        self.translate(-x, -y);

        if transform == Transform::Normal && scale == 1 {
            return;
        }

        for b in &mut self.rects {
            *b = match transform {
                Transform::Normal => *b,
                Transform::Rotated90 => Rect::new(h - b.y2, b.x1, h - b.y1, b.x2),
                Transform::Rotated180 => Rect::new(w - b.x2, h - b.y2, w - b.x1, h - b.y1),
                Transform::Rotated270 => Rect::new(b.y1, w - b.x2, b.y2, w - b.x1),
                Transform::Flipped => Rect::new(w - b.x2, b.y1, w - b.x1, b.y2),
                Transform::Flipped90 => Rect::new(h - b.y2, w - b.x2, h - b.y1, w - b.x1),
                Transform::Flipped180 => Rect::new(b.x1, h - b.y2, b.x2, h - b.y1),
                Transform::Flipped270 => Rect::new(b.y1, b.x1, b.y2, b.x2),
            };
        }

        if scale != 1 {
            for b in &mut self.rects {
                b.x1 *= scale;
                b.y1 *= scale;
                b.x2 *= scale;
                b.y2 *= scale;
            }
        }
    }
}

impl PartialEq for Region {
    /// Set equality, independent of how the rectangles are split.
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.subtract(other);
        if !a.is_empty() {
            return false;
        }

        let mut b = other.clone();
        b.subtract(self);
        b.is_empty()
    }
}

impl Eq for Region {}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: i32, h: i32) -> Rect {
        Rect::from_size(x, y, w, h)
    }

    #[test]
    fn union_overlapping() {
        let mut a = Region::from_rect(r(0, 0, 10, 10));
        a.union_rect(r(5, 5, 10, 10));

        assert!(a.contains_point(0, 0));
        assert!(a.contains_point(14, 14));
        assert!(!a.contains_point(14, 4));
        assert_eq!(a.extents(), Rect::new(0, 0, 15, 15));

        // Fully covered union is a no-op.
        let before = a.clone();
        a.union_rect(r(1, 1, 2, 2));
        assert_eq!(a, before);
    }

    #[test]
    fn subtract_punches_hole() {
        let mut a = Region::from_rect(r(0, 0, 10, 10));
        a.subtract_rect(r(2, 2, 4, 4));

        assert!(a.contains_point(0, 0));
        assert!(a.contains_point(9, 9));
        assert!(!a.contains_point(3, 3));
        assert_eq!(a.contains_rect(&r(2, 2, 4, 4)), Containment::Out);
        assert_eq!(a.contains_rect(&r(0, 0, 10, 10)), Containment::Part);
        assert_eq!(a.contains_rect(&r(0, 0, 2, 10)), Containment::In);

        // Punching the hole back in restores the square.
        a.union_rect(r(2, 2, 4, 4));
        assert_eq!(a, Region::from_rect(r(0, 0, 10, 10)));
    }

    #[test]
    fn intersect_regions() {
        let mut a = Region::from_rect(r(0, 0, 10, 10));
        a.union_rect(r(20, 0, 10, 10));

        let b = Region::from_rect(r(5, 5, 20, 20));
        a.intersect(&b);

        let mut expected = Region::from_rect(r(5, 5, 5, 5));
        expected.union_rect(r(20, 5, 5, 5));
        assert_eq!(a, expected);
    }

    #[test]
    fn infinite_contains_everything() {
        let inf = Region::infinite();
        assert!(inf.contains_point(-100000, 100000));
        assert_eq!(inf.contains_rect(&r(-5000, -5000, 10000, 10000)), Containment::In);
    }

    #[test]
    fn transform_translates_exactly() {
        let mut a = Region::from_rect(r(0, 0, 4, 4));
        a.transform(&Matrix::translate(10.0, 20.0));
        assert_eq!(a, Region::from_rect(r(10, 20, 4, 4)));
    }

    #[test]
    fn transform_rotation_takes_bounding_box() {
        let mut a = Region::from_rect(r(0, 0, 10, 10));
        a.transform(&Matrix::rotate_z(std::f64::consts::FRAC_PI_4));

        let e = a.extents();
        assert!(e.x1 <= -8 && e.x2 >= 8);
        assert!(e.y1 <= 0 && e.y2 >= 14);
    }

    #[test]
    fn output_local_mapping() {
        // A region on an output at (100, 50), 300x200 logical, rotated 90.
        let mut a = Region::from_rect(r(110, 70, 30, 40));
        a.to_output_local(100, 50, 300, 200, Transform::Rotated90, 1);
        assert_eq!(a, Region::from_rect(Rect::new(200 - 60, 10, 200 - 20, 40)));

        // Scale only.
        let mut b = Region::from_rect(r(110, 70, 30, 40));
        b.to_output_local(100, 50, 300, 200, Transform::Normal, 2);
        assert_eq!(b, Region::from_rect(Rect::new(20, 40, 80, 120)));
    }
}
