use crate::*;

pub const SPECTRUM_CHANNELS: usize = 3;

/// Component-wise `$op` with another color or a scalar, and the assigning forms.
#[macro_export]
macro_rules! impl_color_op {
    ($t:ty, $op:ident, $f:ident, $op_assign:ident, $f_assign:ident) => {
        impl std::ops::$op for $t {
            type Output = $t;
            fn $f(self, rhs: $t) -> Self::Output {
                Self {
                    values: std::ops::$op::$f(self.values, rhs.values),
                }
            }
        }
        impl std::ops::$op<f32> for $t {
            type Output = $t;
            fn $f(self, rhs: f32) -> Self::Output {
                Self {
                    values: std::ops::$op::$f(self.values, rhs),
                }
            }
        }
        impl std::ops::$op_assign for $t {
            fn $f_assign(&mut self, rhs: $t) {
                *self = std::ops::$op::$f(*self, rhs);
            }
        }
        impl std::ops::$op_assign<f32> for $t {
            fn $f_assign(&mut self, rhs: f32) {
                *self = std::ops::$op::$f(*self, rhs);
            }
        }
    };
}

#[macro_export]
macro_rules! impl_color_like {
    ($t:ty,$inner:ty) => {
        impl $t {
            pub const fn new(values: $inner) -> Self {
                Self { values }
            }
            pub fn splat(value: f32) -> Self {
                Self {
                    values: <$inner>::splat(value),
                }
            }
            pub fn max_element(&self) -> f32 {
                self.values.max_element()
            }
            pub fn min_element(&self) -> f32 {
                self.values.min_element()
            }
            pub const fn zero() -> $t {
                Self {
                    values: <$inner>::ZERO,
                }
            }
            pub const fn one() -> $t {
                Self {
                    values: <$inner>::ONE,
                }
            }
            pub fn is_black(&self) -> bool {
                !self.values.is_finite()
                    || self.values.cmpeq(<$inner>::ZERO).all()
                    || self.values.cmplt(<$inner>::ZERO).any()
            }
            pub fn is_zero(&self) -> bool {
                self.values.cmpeq(<$inner>::ZERO).all()
            }
            pub fn is_finite(&self) -> bool {
                self.values.is_finite()
            }
            pub fn abs(&self) -> Self {
                Self {
                    values: self.values.abs(),
                }
            }
            pub fn sum(&self) -> f32 {
                self.values.dot(<$inner>::ONE)
            }
            pub fn average(&self) -> f32 {
                self.sum() / SPECTRUM_CHANNELS as f32
            }
            pub fn dot(&self, rhs: Self) -> f32 {
                self.values.dot(rhs.values)
            }
            pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
                let mut values = self.values;
                for i in 0..SPECTRUM_CHANNELS {
                    values[i] = f(values[i]);
                }
                Self { values }
            }
            pub fn zip<F: Fn(f32, f32) -> f32>(&self, rhs: Self, f: F) -> Self {
                let mut values = self.values;
                for i in 0..SPECTRUM_CHANNELS {
                    values[i] = f(values[i], rhs.values[i]);
                }
                Self { values }
            }
            pub fn exp(&self) -> Self {
                self.map(f32::exp)
            }
            pub fn lerp(x: Self, y: Self, a: f32) -> Self {
                x * (1.0 - a) + y * a
            }
            pub const fn values(&self) -> $inner {
                self.values
            }
        }
        impl Default for $t {
            fn default() -> Self {
                Self::zero()
            }
        }
        impl std::ops::Index<usize> for $t {
            type Output = f32;
            fn index(&self, index: usize) -> &Self::Output {
                &self.values[index]
            }
        }
        impl std::ops::IndexMut<usize> for $t {
            fn index_mut(&mut self, index: usize) -> &mut Self::Output {
                &mut self.values[index]
            }
        }
        impl std::ops::Neg for $t {
            type Output = $t;
            fn neg(self) -> Self::Output {
                Self {
                    values: -self.values,
                }
            }
        }
        impl std::ops::Mul<$t> for f32 {
            type Output = $t;
            fn mul(self, rhs: $t) -> Self::Output {
                rhs * self
            }
        }
        $crate::impl_color_op!($t, Add, add, AddAssign, add_assign);
        $crate::impl_color_op!($t, Sub, sub, SubAssign, sub_assign);
        $crate::impl_color_op!($t, Mul, mul, MulAssign, mul_assign);
        $crate::impl_color_op!($t, Div, div, DivAssign, div_assign);
    };
}

/// Transport quantity carried along a path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spectrum {
    values: Vec3,
}
/// Film-space color, what ends up in the render buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    values: Vec3,
}
impl_color_like!(Spectrum, Vec3);
impl_color_like!(Rgb, Vec3);

impl Spectrum {
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(vec3(r, g, b))
    }
    pub fn to_rgb(&self) -> Rgb {
        Rgb::new(self.values)
    }
    /// Replace NaN and infinite components with zero.
    pub fn ensure_finite(&self) -> Self {
        self.map(|x| if x.is_finite() { x } else { 0.0 })
    }
    /// Component-wise `self / rhs`, using `fallback` where the divisor is zero.
    pub fn safe_divide(&self, rhs: Self, fallback: f32) -> Self {
        self.zip(rhs, |a, b| if b != 0.0 { a / b } else { fallback })
    }
    pub fn channel(&self, i: usize) -> f32 {
        self.values[i]
    }
}
