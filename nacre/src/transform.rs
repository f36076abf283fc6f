// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Matrix math for view and output transforms.
//!
//! Matrices carry a flag bitfield recording which kinds of components have
//! been composed into them. The flags let the repaint path short-circuit:
//! an identity transform skips the math entirely, and a translation-only
//! transform can use nearest-neighbour sampling with a scissor rectangle.

use glam::{DMat4, DVec4};
use wayland_server::protocol::wl_output;

pub const MATRIX_TRANSLATE: u32 = 1 << 0;
pub const MATRIX_SCALE: u32 = 1 << 1;
pub const MATRIX_ROTATE: u32 = 1 << 2;
pub const MATRIX_COMPLEX: u32 = 1 << 3;

/// One of the eight wl_output transforms, with the exact pixel mapping of
/// the Wayland protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Transform {
    #[default]
    Normal = 0,
    Rotated90 = 1,
    Rotated180 = 2,
    Rotated270 = 3,
    Flipped = 4,
    Flipped90 = 5,
    Flipped180 = 6,
    Flipped270 = 7,
}

impl Transform {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Transform::Normal,
            1 => Transform::Rotated90,
            2 => Transform::Rotated180,
            3 => Transform::Rotated270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        })
    }

    pub fn from_wl(wl: wl_output::Transform) -> Self {
        match wl {
            wl_output::Transform::Normal => Transform::Normal,
            wl_output::Transform::_90 => Transform::Rotated90,
            wl_output::Transform::_180 => Transform::Rotated180,
            wl_output::Transform::_270 => Transform::Rotated270,
            wl_output::Transform::Flipped => Transform::Flipped,
            wl_output::Transform::Flipped90 => Transform::Flipped90,
            wl_output::Transform::Flipped180 => Transform::Flipped180,
            wl_output::Transform::Flipped270 => Transform::Flipped270,
            _ => Transform::Normal,
        }
    }

    pub fn to_wl(self) -> wl_output::Transform {
        match self {
            Transform::Normal => wl_output::Transform::Normal,
            Transform::Rotated90 => wl_output::Transform::_90,
            Transform::Rotated180 => wl_output::Transform::_180,
            Transform::Rotated270 => wl_output::Transform::_270,
            Transform::Flipped => wl_output::Transform::Flipped,
            Transform::Flipped90 => wl_output::Transform::Flipped90,
            Transform::Flipped180 => wl_output::Transform::Flipped180,
            Transform::Flipped270 => wl_output::Transform::Flipped270,
        }
    }

    /// Whether width and height trade places under this transform.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rotated90
                | Transform::Rotated270
                | Transform::Flipped90
                | Transform::Flipped270
        )
    }
}

/// A 4x4 projective matrix tagged with component flags.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix {
    m: DMat4,
    flags: u32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        Self {
            m: DMat4::IDENTITY,
            flags: 0,
        }
    }

    pub fn translate(x: f64, y: f64) -> Self {
        let flags = if x != 0.0 || y != 0.0 {
            MATRIX_TRANSLATE
        } else {
            0
        };

        Self {
            m: DMat4::from_translation(glam::dvec3(x, y, 0.0)),
            flags,
        }
    }

    pub fn scale(x: f64, y: f64) -> Self {
        let flags = if x != 1.0 || y != 1.0 { MATRIX_SCALE } else { 0 };

        Self {
            m: DMat4::from_scale(glam::dvec3(x, y, 1.0)),
            flags,
        }
    }

    pub fn rotate_z(radians: f64) -> Self {
        let flags = if radians != 0.0 { MATRIX_ROTATE } else { 0 };

        Self {
            m: DMat4::from_rotation_z(radians),
            flags,
        }
    }

    /// Wraps an arbitrary matrix. Nothing is known about its structure, so
    /// every fast path is disabled.
    pub fn from_mat4(m: DMat4) -> Self {
        Self {
            m,
            flags: MATRIX_COMPLEX,
        }
    }

    pub fn raw(&self) -> &DMat4 {
        &self.m
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_identity(&self) -> bool {
        self.flags == 0
    }

    pub fn is_translation(&self) -> bool {
        self.flags & !MATRIX_TRANSLATE == 0
    }

    /// The translation terms of the matrix.
    pub fn translation(&self) -> (f64, f64) {
        (self.m.w_axis.x, self.m.w_axis.y)
    }

    /// `self * other`, applying `other` first.
    pub fn mul(&self, other: &Matrix) -> Matrix {
        Matrix {
            m: self.m * other.m,
            flags: self.flags | other.flags,
        }
    }

    /// Pre-applies a translation: `self := translate(x, y) * self`.
    pub fn translate_by(&mut self, x: f64, y: f64) {
        self.m = DMat4::from_translation(glam::dvec3(x, y, 0.0)) * self.m;
        if x != 0.0 || y != 0.0 {
            self.flags |= MATRIX_TRANSLATE;
        }
    }

    pub fn inverse(&self) -> Option<Matrix> {
        if self.m.determinant().abs() < 1e-12 {
            return None;
        }

        Some(Matrix {
            m: self.m.inverse(),
            flags: self.flags,
        })
    }

    /// Transforms a point, dividing through by w.
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        let v = self.m * DVec4::new(x, y, 0.0, 1.0);
        debug_assert!(v.w.abs() >= 1e-6);
        (v.x / v.w, v.y / v.w)
    }
}

/// Builds the matrix mapping global coordinates into output-local
/// framebuffer coordinates: translate to the output origin, apply the
/// output transform, then the output scale.
pub fn output_matrix(x: f64, y: f64, w: f64, h: f64, transform: Transform, scale: i32) -> Matrix {
    // The transform component expressed as x' = a*x + b*y + e,
    // y' = c*x + d*y + f.
    let (a, b, c, d, e, f) = match transform {
        Transform::Normal => (1.0, 0.0, 0.0, 1.0, 0.0, 0.0),
        Transform::Flipped => (-1.0, 0.0, 0.0, 1.0, w, 0.0),
        Transform::Rotated90 => (0.0, -1.0, 1.0, 0.0, h, 0.0),
        Transform::Flipped90 => (0.0, -1.0, -1.0, 0.0, h, w),
        Transform::Rotated180 => (-1.0, 0.0, 0.0, -1.0, w, h),
        Transform::Flipped180 => (1.0, 0.0, 0.0, -1.0, 0.0, h),
        Transform::Rotated270 => (0.0, 1.0, -1.0, 0.0, 0.0, w),
        Transform::Flipped270 => (0.0, 1.0, 1.0, 0.0, 0.0, 0.0),
    };

    let s = scale as f64;
    let (tx, ty) = (-x, -y);

    let m = DMat4::from_cols_array(&[
        s * a,
        s * c,
        0.0,
        0.0,
        s * b,
        s * d,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
        0.0,
        s * (a * tx + b * ty + e),
        s * (c * tx + d * ty + f),
        0.0,
        1.0,
    ]);

    let mut flags = 0;
    if s != 1.0 {
        flags |= MATRIX_SCALE;
    }
    if tx != 0.0 || ty != 0.0 || e != 0.0 || f != 0.0 {
        flags |= MATRIX_TRANSLATE;
    }
    if a != 1.0 || d != 1.0 {
        flags |= MATRIX_ROTATE;
    }

    Matrix { m, flags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_maps(m: &Matrix, from: (f64, f64), to: (f64, f64)) {
        let (x, y) = m.transform_point(from.0, from.1);
        assert!(
            (x - to.0).abs() < 1e-9 && (y - to.1).abs() < 1e-9,
            "{from:?} mapped to ({x}, {y}), expected {to:?}"
        );
    }

    #[test]
    fn flags_compose() {
        let t = Matrix::translate(10.0, 5.0);
        assert!(t.is_translation());
        assert!(!t.is_identity());

        let s = Matrix::scale(2.0, 2.0);
        let ts = t.mul(&s);
        assert_eq!(ts.flags() & MATRIX_TRANSLATE, MATRIX_TRANSLATE);
        assert_eq!(ts.flags() & MATRIX_SCALE, MATRIX_SCALE);
        assert!(!ts.is_translation());

        assert!(Matrix::identity().is_identity());
        assert!(Matrix::translate(0.0, 0.0).is_identity());
    }

    #[test]
    fn translation_roundtrip() {
        let t = Matrix::translate(100.0, -40.0);
        assert_maps(&t, (3.0, 4.0), (103.0, -36.0));

        let inv = t.inverse().unwrap();
        assert!(inv.is_translation());
        assert_maps(&inv, (103.0, -36.0), (3.0, 4.0));
    }

    #[test]
    fn output_transform_pixel_mapping() {
        // A 300x200 output. Check the wayland mapping for the top-left
        // corner region and a distinguished interior point.
        let w = 300.0;
        let h = 200.0;

        let cases = [
            (Transform::Normal, (10.0, 20.0), (10.0, 20.0)),
            (Transform::Rotated90, (10.0, 20.0), (h - 20.0, 10.0)),
            (Transform::Rotated180, (10.0, 20.0), (w - 10.0, h - 20.0)),
            (Transform::Rotated270, (10.0, 20.0), (20.0, w - 10.0)),
            (Transform::Flipped, (10.0, 20.0), (w - 10.0, 20.0)),
            (Transform::Flipped90, (10.0, 20.0), (h - 20.0, w - 10.0)),
            (Transform::Flipped180, (10.0, 20.0), (10.0, h - 20.0)),
            (Transform::Flipped270, (10.0, 20.0), (20.0, 10.0)),
        ];

        for (transform, from, to) in cases {
            let m = output_matrix(0.0, 0.0, w, h, transform, 1);
            assert_maps(&m, from, to);
        }
    }

    #[test]
    fn output_matrix_origin_and_scale() {
        let m = output_matrix(100.0, 50.0, 300.0, 200.0, Transform::Normal, 2);
        assert_maps(&m, (100.0, 50.0), (0.0, 0.0));
        assert_maps(&m, (110.0, 60.0), (20.0, 20.0));
    }
}
