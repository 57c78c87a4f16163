pub mod bsdf;
pub mod film;
pub mod geometry;
pub mod hash;
pub mod pattern;
pub mod sampling;
pub mod scene;
#[macro_use]
pub mod spectrum;
pub mod util;

pub use film::*;
pub use geometry::*;
pub use sampling::*;
pub use spectrum::*;

pub use glam::{vec2, vec3, Vec2, Vec3};
pub use rayon::prelude::*;
use std::ops::{Add, Mul, Sub};
pub use wavepath_common::{bitflags::bitflags, glam, log, parking_lot, rayon, smallvec};

pub const PI: f32 = std::f32::consts::PI;
pub const FRAC_1_PI: f32 = std::f32::consts::FRAC_1_PI;
pub const FRAC_PI_2: f32 = std::f32::consts::FRAC_PI_2;
pub const FRAC_PI_4: f32 = std::f32::consts::FRAC_PI_4;

#[inline]
pub fn lerp<T, S>(x: T, y: T, a: S) -> T
where
    T: Sub<Output = T> + Add<Output = T> + Mul<S, Output = T> + Copy,
    S: Copy,
{
    x + (y - x) * a
}

#[inline]
pub fn safe_divide(a: f32, b: f32) -> f32 {
    if b != 0.0 {
        a / b
    } else {
        0.0
    }
}
