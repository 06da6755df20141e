use glam::{Quat, Vec3};

/// Blend between two channel values. Rotations take the spherical path.
pub trait Interpolate: Copy {
    fn interpolate(left: Self, right: Self, n: f32) -> Self;
}

impl Interpolate for Vec3 {
    #[inline]
    fn interpolate(left: Self, right: Self, n: f32) -> Self {
        left.lerp(right, n)
    }
}

impl Interpolate for Quat {
    #[inline]
    fn interpolate(left: Self, right: Self, n: f32) -> Self {
        left.slerp(right, n)
    }
}
