use crate::*;
use smallvec::SmallVec;

bitflags! {
    /// What kind of scattering event produced a sampled direction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Label: u32 {
        const TRANSMIT = 1 << 0;
        const REFLECT = 1 << 1;
        const DIFFUSE = 1 << 2;
        const GLOSSY = 1 << 3;
        const SINGULAR = 1 << 4;
        const TRANSPARENT = 1 << 5;
        const VOLUME_SCATTER = 1 << 6;
        const TRANSMIT_TRANSPARENT = 1 << 7;
        const RAY_PORTAL = 1 << 8;
    }
}

/// Closure evaluation split into light-pass components. `sum` is always the total,
/// transmission is whatever is left after diffuse and glossy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BsdfEval {
    pub diffuse: Spectrum,
    pub glossy: Spectrum,
    pub sum: Spectrum,
}

impl BsdfEval {
    pub fn zero() -> Self {
        Self::default()
    }
    pub fn new(label: Label, value: Spectrum) -> Self {
        let mut eval = Self::zero();
        eval.accum(label, value);
        eval
    }
    pub fn accum(&mut self, label: Label, value: Spectrum) {
        if label.contains(Label::DIFFUSE) {
            self.diffuse += value;
        } else if label.intersects(Label::GLOSSY | Label::SINGULAR) {
            self.glossy += value;
        }
        self.sum += value;
    }
    pub fn mul(&mut self, s: Spectrum) {
        self.diffuse *= s;
        self.glossy *= s;
        self.sum *= s;
    }
    pub fn mul_f(&mut self, s: f32) {
        self.diffuse *= s;
        self.glossy *= s;
        self.sum *= s;
    }
    pub fn is_zero(&self) -> bool {
        self.sum.is_zero()
    }
    pub fn pass_diffuse_weight(&self) -> Spectrum {
        self.diffuse.safe_divide(self.sum, 0.0)
    }
    pub fn pass_glossy_weight(&self) -> Spectrum {
        self.glossy.safe_divide(self.sum, 0.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BsdfSample {
    pub wo: Vec3,
    pub eval: BsdfEval,
    pub pdf: f32,
    pub label: Label,
}

/// Henyey-Greenstein phase closure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaderVolumeClosure {
    pub weight: Spectrum,
    pub sample_weight: f32,
    pub g: f32,
}

pub type ShaderVolumePhases = SmallVec<[ShaderVolumeClosure; 4]>;

pub fn phase_henyey_greenstein(cos_theta: f32, g: f32) -> f32 {
    if g == 0.0 {
        return 0.25 * FRAC_1_PI;
    }
    let denom = 1.0 + g * g - 2.0 * g * cos_theta;
    0.25 * FRAC_1_PI * (1.0 - g * g) / (denom * denom.max(0.0).sqrt())
}

/// Samples a direction around the forward direction `d`. Returns `(wo, pdf)`.
pub fn sample_henyey_greenstein(d: Vec3, g: f32, u: Vec2) -> (Vec3, f32) {
    let cos_theta = if g.abs() < 1e-3 {
        1.0 - 2.0 * u.x
    } else {
        let k = (1.0 - g * g) / (1.0 - g + 2.0 * g * u.x);
        (1.0 + g * g - k * k) / (2.0 * g)
    };
    let cos_theta = cos_theta.clamp(-1.0, 1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    let (t, b) = make_orthonormals(d);
    let wo = t * (sin_theta * phi.cos()) + b * (sin_theta * phi.sin()) + d * cos_theta;
    (wo, phase_henyey_greenstein(cos_theta, g))
}

/// Mixture evaluation of all phases toward `wo`, `wi` pointing back along the ray.
pub fn eval_phases(phases: &ShaderVolumePhases, wi: Vec3, wo: Vec3) -> (BsdfEval, f32) {
    let mut eval = BsdfEval::zero();
    let mut sum_pdf = 0.0;
    let mut sum_sample_weight = 0.0;
    let cos_theta = (-wi).dot(wo);
    for phase in phases.iter() {
        let pdf = phase_henyey_greenstein(cos_theta, phase.g);
        if pdf != 0.0 {
            eval.accum(Label::DIFFUSE, phase.weight * pdf);
            sum_pdf += pdf * phase.sample_weight;
        }
        sum_sample_weight += phase.sample_weight;
    }
    let pdf = if sum_sample_weight > 0.0 {
        sum_pdf / sum_sample_weight
    } else {
        0.0
    };
    (eval, pdf)
}

/// Picks a phase by sample weight, samples it, then evaluates the whole mixture.
pub fn sample_phases(phases: &ShaderVolumePhases, wi: Vec3, u: Vec2) -> Option<BsdfSample> {
    let sum: f32 = phases.iter().map(|p| p.sample_weight).sum();
    if phases.is_empty() || sum <= 0.0 {
        return None;
    }
    let r = u.x * sum;
    let mut partial = 0.0;
    let mut picked = phases.len() - 1;
    let mut ux = u.x;
    for (i, phase) in phases.iter().enumerate() {
        let next = partial + phase.sample_weight;
        if r <= next && phase.sample_weight > 0.0 {
            picked = i;
            ux = ((r - partial) / phase.sample_weight).min(1.0 - f32::EPSILON);
            break;
        }
        partial = next;
    }
    let (wo, _) = sample_henyey_greenstein(-wi, phases[picked].g, vec2(ux, u.y));
    let (eval, pdf) = eval_phases(phases, wi, wo);
    if pdf == 0.0 || eval.is_zero() {
        return None;
    }
    Some(BsdfSample {
        wo,
        eval,
        pdf,
        label: Label::VOLUME_SCATTER,
    })
}
