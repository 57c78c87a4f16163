use crate::*;

pub trait Warp<Input, Output> {
    fn warp(&self, u: Input) -> Output;
    fn pdf(&self, output: Output) -> f32;
}

pub struct ConcentricDisk {}
impl Warp<Vec2, Vec2> for ConcentricDisk {
    fn warp(&self, u: Vec2) -> Vec2 {
        let u_offset: Vec2 = 2.0 * u - vec2(1.0, 1.0);
        if u_offset.x == 0.0 && u_offset.y == 0.0 {
            return Vec2::ZERO;
        }
        let (theta, r) = if u_offset.x.abs() > u_offset.y.abs() {
            (FRAC_PI_4 * (u_offset.y / u_offset.x), u_offset.x)
        } else {
            (FRAC_PI_2 - FRAC_PI_4 * (u_offset.x / u_offset.y), u_offset.y)
        };
        r * vec2(theta.cos(), theta.sin())
    }
    fn pdf(&self, _output: Vec2) -> f32 {
        FRAC_1_PI
    }
}

/// Cosine weighted directions around +Z.
pub struct CosineHemisphere {}
impl Warp<Vec2, Vec3> for CosineHemisphere {
    fn warp(&self, u: Vec2) -> Vec3 {
        let d = ConcentricDisk {}.warp(u);
        let z = (1.0 - d.length_squared()).max(0.0).sqrt();
        vec3(d.x, d.y, z)
    }
    fn pdf(&self, output: Vec3) -> f32 {
        output.z.max(0.0) * FRAC_1_PI
    }
}

/// Cosine weighted direction around `n`, returns `(direction, pdf)`.
pub fn sample_cos_hemisphere(n: Vec3, u: Vec2) -> (Vec3, f32) {
    let local = CosineHemisphere {}.warp(u);
    let (t, b) = make_orthonormals(n);
    let pdf = CosineHemisphere {}.pdf(local);
    ((t * local.x + b * local.y + n * local.z).normalize(), pdf)
}

#[inline]
pub fn power_heuristic(a: f32, b: f32) -> f32 {
    let a2 = a * a;
    let b2 = b * b;
    if a2 + b2 == 0.0 {
        return 0.0;
    }
    a2 / (a2 + b2)
}

/// Samples `p(x) ∝ lambda exp(-lambda (x - t.min))` truncated to `t`.
/// A zero `lambda` degenerates to uniform sampling.
pub fn sample_exponential_distribution(rand: f32, lambda: f32, t: Interval) -> f32 {
    if lambda == 0.0 {
        return lerp(t.min, t.max, rand);
    }
    let attenuation = 1.0 - (-lambda * t.length()).exp();
    t.min - (1.0 - rand * attenuation).ln() / lambda
}

pub fn pdf_exponential_distribution(x: f32, lambda: Spectrum, t: Interval) -> Spectrum {
    let len = t.length();
    lambda.map(|l| {
        if l == 0.0 {
            if len > 0.0 && len.is_finite() {
                1.0 / len
            } else {
                0.0
            }
        } else {
            let attenuation = 1.0 - (-l * len).exp();
            if attenuation == 0.0 {
                0.0
            } else {
                l * (-l * (x - t.min)).exp() / attenuation
            }
        }
    })
}

/// Number of failures before the first success with success probability `r`, cut off at
/// `cutoff` which takes the whole tail. Returns `(n, pmf)`.
pub fn sample_geometric_distribution(rand: f32, r: f32, cutoff: u32) -> (u32, f32) {
    let fail = 1.0 - r;
    let n = ((1.0 - rand).ln() / fail.ln()).floor();
    if !(n < cutoff as f32) {
        return (cutoff, fail.powi(cutoff as i32));
    }
    let n = n.max(0.0) as u32;
    (n, r * fail.powi(n as i32))
}
