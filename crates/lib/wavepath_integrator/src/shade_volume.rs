//! Participating media along a ray segment.
//!
//! The segment between the ray origin and the next surface (or infinity) is integrated
//! analytically when every volume in the stack is homogeneous. Heterogeneous stacks use
//! delta tracking (see [`crate::null_scattering`]), or ray marching when configured.
//! Integration yields up to two scatter positions: an indirect one the path continues from,
//! and a direct one where a light is sampled. Both may coincide.
use crate::intersect_closest::integrator_intersect_next_kernel_after_volume;
use crate::light_passes::*;
use crate::null_scattering::*;
use crate::path_state::*;
use crate::volume_stack::*;
use crate::*;

/// Absorption-only steps are exponentiated in batches of this many.
pub const EXP_BATCH_INTERVAL: u32 = 8;
/// Marching stops once the throughput falls below this.
pub const VOLUME_THROUGHPUT_EPSILON: f32 = 1e-6;
/// Scatter positions with a smaller sampling pdf are rejected.
pub const VOLUME_SAMPLE_PDF_CUTOFF: f32 = 1e-8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeIntegrateEvent {
    Missed,
    Attenuated,
    Scattered,
}

pub fn volume_color_transmittance(sigma_t: Spectrum, t: f32) -> Spectrum {
    (-sigma_t * t).exp()
}

/// One-sample balance heuristic over the channels, weighted by `|throughput * albedo|`.
pub fn volume_sample_channel_pdf(albedo: Spectrum, throughput: Spectrum) -> Spectrum {
    let weights = (throughput * albedo).abs();
    let sum = weights.sum();
    if sum > 0.0 {
        weights / sum
    } else {
        Spectrum::splat(1.0 / SPECTRUM_CHANNELS as f32)
    }
}

/// Picks a channel and remaps `rand` so it can be reused. Returns `(channel, pdf)`.
pub fn volume_sample_channel(albedo: Spectrum, throughput: Spectrum, rand: &mut f32) -> (usize, Spectrum) {
    let pdf = volume_sample_channel_pdf(albedo, throughput);
    let mut sum = 0.0;
    for i in 0..SPECTRUM_CHANNELS {
        let p = pdf[i];
        sum += p;
        if *rand < sum {
            *rand = ((*rand - (sum - p)) / p).min(1.0 - f32::EPSILON);
            return (i, pdf);
        }
    }
    (SPECTRUM_CHANNELS - 1, pdf)
}

/// `∫ E exp(-σt x) dx` over `[0, t]`.
pub fn volume_emission_integrate(coeff: &VolumeShaderCoefficients, closure_flag: ShaderFlags, t: f32) -> Spectrum {
    if !closure_flag.contains(ShaderFlags::EXTINCTION) {
        return coeff.emission * t;
    }
    let optical_depth = coeff.sigma_t * t;
    let factor = Spectrum::new(Vec3::new(
        emission_factor(coeff.sigma_t[0], optical_depth[0], t),
        emission_factor(coeff.sigma_t[1], optical_depth[1], t),
        emission_factor(coeff.sigma_t[2], optical_depth[2], t),
    ));
    coeff.emission * factor
}

fn emission_factor(sigma_t: f32, optical_depth: f32, t: f32) -> f32 {
    if optical_depth > 1e-5 {
        (1.0 - (-optical_depth).exp()) / sigma_t
    } else {
        // second order Taylor expansion
        t * (1.0 - 0.5 * optical_depth)
    }
}

/// Equiangular sampling is centered on the sampled light position `p` and limited to the
/// part of the ray that can see it.
#[derive(Clone, Copy, Debug)]
pub struct EquiangularCoefficients {
    pub p: Vec3,
    pub t_range: Interval,
}

/// Returns `(t, pdf)`.
pub fn volume_equiangular_sample(ray: &Ray, coeffs: &EquiangularCoefficients, xi: f32) -> (f32, f32) {
    let delta = (coeffs.p - ray.o).dot(ray.d);
    let d = (coeffs.p - ray.o - ray.d * delta).length();
    if d == 0.0 {
        return (0.0, 0.0);
    }
    let tmin = coeffs.t_range.min;
    let tmax = coeffs.t_range.max;
    let theta_a = (tmin - delta).atan2(d);
    let theta_b = (tmax - delta).atan2(d);
    let theta_d = theta_b - theta_a;
    if theta_d < 1e-6 {
        return (lerp(tmin, tmax, xi), safe_divide(1.0, tmax - tmin));
    }
    let t = d * (xi * theta_b + (1.0 - xi) * theta_a).tan();
    let pdf = d / (theta_d * (d * d + t * t));
    ((delta + t).clamp(tmin, tmax), pdf)
}

pub fn volume_equiangular_pdf(ray: &Ray, coeffs: &EquiangularCoefficients, sample_t: f32) -> f32 {
    let delta = (coeffs.p - ray.o).dot(ray.d);
    let d = (coeffs.p - ray.o - ray.d * delta).length();
    if d == 0.0 {
        return 0.0;
    }
    let tmin = coeffs.t_range.min;
    let tmax = coeffs.t_range.max;
    let theta_a = (tmin - delta).atan2(d);
    let theta_b = (tmax - delta).atan2(d);
    let theta_d = theta_b - theta_a;
    if theta_d < 1e-6 {
        return safe_divide(1.0, tmax - tmin);
    }
    let t = sample_t - delta;
    d / (theta_d * (d * d + t * t))
}

/// Defers `exp()` of absorption-only steps, since `exp(a) exp(b) = exp(a + b)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtinctionAccumulator {
    optical_depth: Spectrum,
    pending: u32,
}

impl ExtinctionAccumulator {
    pub fn add(&mut self, optical_depth: Spectrum) {
        self.optical_depth += optical_depth;
        self.pending += 1;
    }
    pub fn pending(&self) -> u32 {
        self.pending
    }
    /// Transmittance of the pending steps, once a batch is complete or when forced.
    /// Resets the accumulator when it returns a value.
    pub fn flush(&mut self, force: bool) -> Option<Spectrum> {
        if self.pending == 0 || (!force && self.pending < EXP_BATCH_INTERVAL) {
            return None;
        }
        let transmittance = (-self.optical_depth).exp();
        *self = Self::default();
        Some(transmittance)
    }
}

/// Segmentation of a ray into marching steps.
#[derive(Clone, Copy, Debug)]
pub struct VolumeStep {
    /// Shifts the end of the first step to avoid banding.
    pub offset: f32,
    pub size: f32,
    /// Position of the shading point inside a step.
    pub shade_offset: f32,
    pub max_steps: u32,
    /// Current segment.
    pub t: Interval,
    pub shade_p: Vec3,
    step: u32,
}

impl VolumeStep {
    /// `object_step_size == f32::MAX` means homogeneous: a single step over the whole ray.
    pub fn new(kg: &KernelData, rng: &RngState, object_step_size: f32, ray: &Ray, shadow: bool) -> Self {
        let (size, shade_offset, offset, max_steps) = if object_step_size == f32::MAX {
            (ray.tmax - ray.tmin, 0.0, 1.0, 1)
        } else {
            let max_steps = kg.integrator.volume_max_steps;
            let t = ray.tmax - ray.tmin;
            let mut size = object_step_size.min(t);
            if t > max_steps as f32 * size {
                size = t / max_steps as f32;
            }
            let shade_offset = path_state_rng_1d(kg, rng, dim::VOLUME_SHADE_OFFSET);
            // shadow rays already start at a random point inside the volume
            let offset = if shadow {
                1.0
            } else {
                path_state_rng_1d(kg, rng, dim::VOLUME_OFFSET)
            };
            (size, shade_offset, offset, max_steps)
        };
        Self {
            offset,
            size,
            shade_offset,
            max_steps,
            t: Interval::new(ray.tmin, ray.tmin),
            shade_p: ray.o,
            step: 0,
        }
    }

    /// Moves to the next segment. Returns false at the end of the ray or the step limit.
    pub fn advance(&mut self, ray: &Ray) -> bool {
        if self.t.max == ray.tmax {
            return false;
        }
        let step = self.step;
        self.t.min = self.t.max;
        self.t.max = ray.tmax.min(ray.tmin + (step as f32 + self.offset) * self.size);
        self.shade_p = ray.at(lerp(self.t.min, self.t.max, self.shade_offset));
        self.step += 1;
        step < self.max_steps
    }

    pub fn reached_end(&self, ray: &Ray) -> bool {
        self.t.max == ray.tmax
    }
}

/// Combined shading of every volume in the stack at `sd.p`. Scattering is left out once the
/// path is marked for termination. Returns `None` when nothing there affects light.
pub(crate) fn volume_shader_sample<S: SceneServices>(
    kg: &KernelGlobals<S>,
    path: &PathState,
    stack: &VolumeStack,
    sd: &mut ShaderData,
) -> Option<(VolumeShaderCoefficients, ShaderVolumePhases)> {
    let path_flag = path.flag.bits();
    let mut coeff = VolumeShaderCoefficients::default();
    let mut phases = ShaderVolumePhases::new();
    let mut flag = ShaderFlags::empty();
    for entry in stack.iter() {
        let shading = kg.scene.eval_volume(sd, *entry, path_flag);
        if shading.flag.contains(ShaderFlags::EXTINCTION) {
            coeff.sigma_t += shading.coeff.sigma_t;
        }
        if shading.flag.contains(ShaderFlags::EMISSION) {
            coeff.emission += shading.coeff.emission;
        }
        if shading.flag.contains(ShaderFlags::SCATTER) && !path.termination.is_requested() {
            coeff.sigma_s += shading.coeff.sigma_s;
            phases.extend(shading.phases.iter().copied());
            flag |= ShaderFlags::SCATTER;
        }
        flag |= shading.flag & (ShaderFlags::EXTINCTION | ShaderFlags::EMISSION);
    }
    sd.flag = flag;
    if !flag.intersects(ShaderFlags::EXTINCTION | ShaderFlags::SCATTER | ShaderFlags::EMISSION) {
        return None;
    }
    Some((coeff, phases))
}

pub(crate) fn volume_extinction<S: SceneServices>(kg: &KernelGlobals<S>, stack: &VolumeStack, sd: &ShaderData, path_flag: u32) -> Spectrum {
    let mut sigma_t = Spectrum::zero();
    for entry in stack.iter() {
        sigma_t += kg.scene.eval_volume_extinction(sd, *entry, path_flag);
    }
    sigma_t
}

/// Transmittance of a shadow ray through the volumes of its stack, multiplied into
/// `throughput`.
pub fn volume_shadow_ray_marching<S: SceneServices>(
    kg: &KernelGlobals<S>,
    shadow: &ShadowPathState,
    ray: &Ray,
    throughput: &mut Spectrum,
) {
    let stack = &shadow.volume_stack;
    if stack.is_empty() {
        return;
    }
    let step_size = volume_stack_step_size(kg.data, kg.scene, stack);
    let mut vstep = VolumeStep::new(kg.data, &shadow.rng_state(), step_size, ray, true);
    let mut sd = kg.scene.shader_setup_from_volume(ray, stack[0].object);
    let path_flag = PathRayFlag::SHADOW.bits();

    let mut tp = *throughput;
    let mut extinction = ExtinctionAccumulator::default();
    while vstep.advance(ray) {
        sd.p = vstep.shade_p;
        let sigma_t = volume_extinction(kg, stack, &sd, path_flag);
        extinction.add(sigma_t * vstep.t.length());
        if let Some(transmittance) = extinction.flush(false) {
            tp *= transmittance;
            // nearly all light is blocked, the rest of the ray is skipped
            if tp.max_element() < VOLUME_THROUGHPUT_EPSILON {
                break;
            }
        }
    }
    if let Some(transmittance) = extinction.flush(true) {
        tp *= transmittance;
    }
    *throughput = tp;
}

/// Scatter positions found along a segment.
#[derive(Clone, Debug)]
pub struct VolumeIntegrateResult {
    pub direct_scatter: bool,
    pub direct_throughput: Spectrum,
    pub direct_t: f32,
    pub direct_phases: ShaderVolumePhases,
    pub indirect_scatter: bool,
    pub indirect_throughput: Spectrum,
    pub indirect_t: f32,
    pub indirect_phases: ShaderVolumePhases,
}

impl VolumeIntegrateResult {
    fn new(throughput: Spectrum, direct: bool) -> Self {
        Self {
            direct_scatter: false,
            direct_throughput: if direct { throughput } else { Spectrum::zero() },
            direct_t: 0.0,
            direct_phases: ShaderVolumePhases::new(),
            indirect_scatter: false,
            indirect_throughput: throughput,
            indirect_t: 0.0,
            indirect_phases: ShaderVolumePhases::new(),
        }
    }
    /// Zeroes throughputs that are still being attenuated and dropped below
    /// [`VOLUME_THROUGHPUT_EPSILON`]. A direct scatter found by distance sampling copies the
    /// indirect one, so it goes together with it.
    fn cut_off_throughput(&mut self, direct_sample_method: VolumeSampleMethod) {
        if !self.indirect_scatter && self.indirect_throughput.max_element() < VOLUME_THROUGHPUT_EPSILON {
            self.indirect_throughput = Spectrum::zero();
            if direct_sample_method == VolumeSampleMethod::Distance && !self.direct_scatter {
                self.direct_throughput = Spectrum::zero();
            }
        }
        if !self.direct_scatter && self.direct_throughput.max_element() < VOLUME_THROUGHPUT_EPSILON {
            self.direct_throughput = Spectrum::zero();
        }
    }
    /// Each throughput is either locked at its scatter position or fully absorbed.
    fn should_stop(&self) -> bool {
        let indirect_done = self.indirect_scatter || self.indirect_throughput.is_zero();
        let direct_done = self.direct_scatter || self.direct_throughput.is_zero();
        indirect_done && direct_done
    }
}

/// Random numbers and MIS bookkeeping for one segment.
#[derive(Clone, Copy, Debug)]
pub struct VolumeRayMarchingState {
    pub rscatter: f32,
    pub rchannel: f32,
    /// Strategy this sample uses for the direct scatter; with MIS one of the two is picked.
    pub direct_sample_method: VolumeSampleMethod,
    pub use_mis: bool,
    pub distance_pdf: f32,
    pub equiangular_pdf: f32,
}

impl VolumeRayMarchingState {
    pub fn new(kg: &KernelData, rng: &RngState, direct_sample_method: VolumeSampleMethod) -> Self {
        let mut rscatter = path_state_rng_1d(kg, rng, dim::VOLUME_SCATTER_DISTANCE);
        let rchannel = path_state_rng_1d(kg, rng, dim::VOLUME_COLOR_CHANNEL);
        let use_mis = direct_sample_method == VolumeSampleMethod::Mis;
        let mut method = direct_sample_method;
        if use_mis {
            if rscatter < 0.5 {
                rscatter *= 2.0;
                method = VolumeSampleMethod::Distance;
            } else {
                rscatter = (rscatter - 0.5) * 2.0;
                method = VolumeSampleMethod::Equiangular;
            }
        }
        Self {
            rscatter,
            rchannel,
            direct_sample_method: method,
            use_mis,
            distance_pdf: 1.0,
            equiangular_pdf: 0.0,
        }
    }
}

/// Samples a light for the segment. On success returns the light and narrows the
/// equiangular range to the part of the ray that sees it.
fn volume_sample_direct_light<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &ShaderData,
    equiangular: &mut EquiangularCoefficients,
) -> Option<LightSample> {
    if !kg.data.integrator.use_direct_light {
        return None;
    }
    let path = &state.path;
    let rand_light = path_state_rng_3d(kg.data, &path.rng_state(), dim::LIGHT);
    let ls = kg.scene.sample_light_from_volume_segment(
        rand_light,
        sd.time,
        sd.p,
        ray.d,
        ray.tmax - ray.tmin,
        path.bounce,
        path.flag.bits(),
    )?;
    if ls.shader_flags.contains(ShaderFlags::EXCLUDE_SCATTER) {
        return None;
    }
    equiangular.p = ls.p;
    if !kg.scene.valid_ray_segment(&ls, ray.o, ray.d, &mut equiangular.t_range) {
        return None;
    }
    Some(ls)
}

fn volume_direct_sample_method<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &ShaderData,
    equiangular: &mut EquiangularCoefficients,
) -> VolumeSampleMethod {
    if state.path.termination.is_requested() {
        return VolumeSampleMethod::None;
    }
    match volume_sample_direct_light(kg, state, ray, sd, equiangular) {
        None => VolumeSampleMethod::None,
        // distant and background lights have no position to center on
        Some(ls) if ls.t == f32::MAX => VolumeSampleMethod::Distance,
        Some(_) => volume_stack_sample_method(kg.scene, &state.volume_stack),
    }
}

/// Distance sampling of the indirect scatter inside the current step. Returns true when
/// the scatter position was found in this step.
#[allow(clippy::too_many_arguments)]
fn volume_sample_indirect_scatter_ray_marching(
    transmittance: Spectrum,
    channel_pdf: Spectrum,
    channel: usize,
    coeff: &VolumeShaderCoefficients,
    phases: &ShaderVolumePhases,
    t: Interval,
    vstate: &mut VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) -> bool {
    if result.indirect_scatter {
        return false;
    }
    let sample_transmittance = transmittance[channel];
    if 1.0 - vstate.rscatter >= sample_transmittance {
        // random walk with p(dt) = σt exp(-σt dt) in the picked channel
        let sample_sigma_t = coeff.sigma_t[channel];
        let new_dt = -(1.0 - vstate.rscatter).ln() / sample_sigma_t;
        let new_t = t.min + new_dt;
        let new_transmittance = volume_color_transmittance(coeff.sigma_t, new_dt);
        let distance_pdf = channel_pdf.dot(coeff.sigma_t * new_transmittance);
        if vstate.distance_pdf * distance_pdf > VOLUME_SAMPLE_PDF_CUTOFF {
            result.indirect_scatter = true;
            result.indirect_t = new_t;
            result.indirect_throughput *= coeff.sigma_s * new_transmittance / distance_pdf;
            if vstate.direct_sample_method == VolumeSampleMethod::Distance {
                vstate.distance_pdf *= distance_pdf;
            }
            result.indirect_phases = phases.clone();
            return true;
        }
    } else {
        let distance_pdf = channel_pdf.dot(transmittance);
        result.indirect_throughput *= transmittance / distance_pdf;
        if vstate.direct_sample_method == VolumeSampleMethod::Distance {
            vstate.distance_pdf *= distance_pdf;
        }
        // remap to reuse the same number in later steps
        vstate.rscatter = 1.0 - (1.0 - vstate.rscatter) / sample_transmittance;
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn volume_ray_marching_step_scattering(
    ray: &Ray,
    equiangular: &EquiangularCoefficients,
    coeff: &VolumeShaderCoefficients,
    phases: &ShaderVolumePhases,
    transmittance: Spectrum,
    t: Interval,
    vstate: &mut VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) {
    // channels without extinction get albedo 1 so picking them samples past the step
    let albedo = coeff.sigma_s.safe_divide(coeff.sigma_t, 1.0);
    let (channel, channel_pdf) = volume_sample_channel(albedo, result.indirect_throughput, &mut vstate.rchannel);

    if vstate.direct_sample_method == VolumeSampleMethod::Equiangular && !result.direct_scatter {
        if t.contains(result.direct_t) && vstate.equiangular_pdf > VOLUME_SAMPLE_PDF_CUTOFF {
            let new_dt = result.direct_t - t.min;
            let new_transmittance = volume_color_transmittance(coeff.sigma_t, new_dt);
            result.direct_scatter = true;
            result.direct_throughput *= coeff.sigma_s * new_transmittance / vstate.equiangular_pdf;
            result.direct_phases = phases.clone();
            if vstate.use_mis {
                let distance_pdf = vstate.distance_pdf * channel_pdf.dot(coeff.sigma_t * new_transmittance);
                result.direct_throughput *= 2.0 * power_heuristic(vstate.equiangular_pdf, distance_pdf);
            }
        } else {
            result.direct_throughput *= transmittance;
            vstate.distance_pdf *= channel_pdf.dot(transmittance);
        }
    }

    if volume_sample_indirect_scatter_ray_marching(
        transmittance,
        channel_pdf,
        channel,
        coeff,
        phases,
        t,
        vstate,
        result,
    ) && vstate.direct_sample_method == VolumeSampleMethod::Distance
    {
        // same point for both
        result.direct_scatter = true;
        result.direct_t = result.indirect_t;
        result.direct_throughput = result.indirect_throughput;
        result.direct_phases = phases.clone();
        if vstate.use_mis {
            let equiangular_pdf = volume_equiangular_pdf(ray, equiangular, result.indirect_t);
            result.direct_throughput *= 2.0 * power_heuristic(vstate.distance_pdf, equiangular_pdf);
        }
    }
}

/// Emission and denoising albedo gathered along a segment, written once at the end.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct VolumeAccum {
    pub emission: Spectrum,
    pub albedo: Spectrum,
    pub optical_depth: f32,
}

fn apply_transmittance(result: &mut VolumeIntegrateResult, transmittance: Spectrum) {
    if !result.indirect_scatter {
        result.indirect_throughput *= transmittance;
    }
    if !result.direct_scatter {
        result.direct_throughput *= transmittance;
    }
}

/// Absorption-only steps go through an [`ExtinctionAccumulator`]; its pending transmittance
/// is applied before any step that needs the current throughput.
#[allow(clippy::too_many_arguments)]
fn volume_integrate_ray_marching<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    step_size: f32,
    equiangular: &EquiangularCoefficients,
    vstate: &mut VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) -> VolumeAccum {
    let rng = state.path.rng_state();
    let mut vstep = VolumeStep::new(kg.data, &rng, step_size, ray, false);
    let write_denoising = state.path.flag.contains(PathRayFlag::DENOISING_FEATURES);
    let mut accum = VolumeAccum::default();
    let mut extinction = ExtinctionAccumulator::default();

    while vstep.advance(ray) {
        sd.p = vstep.shade_p;
        let Some((coeff, phases)) = volume_shader_sample(kg, &state.path, &state.volume_stack, sd) else {
            continue;
        };
        let closure_flag = sd.flag;
        let dt = vstep.t.length();
        let emits = closure_flag.contains(ShaderFlags::EMISSION) && !result.indirect_scatter;
        let scatters = closure_flag.contains(ShaderFlags::SCATTER);

        if emits || scatters {
            if let Some(transmittance) = extinction.flush(true) {
                apply_transmittance(result, transmittance);
            }
        }

        if emits {
            let emission = volume_emission_integrate(&coeff, closure_flag, dt);
            accum.emission += result.indirect_throughput * emission;
        }

        if scatters {
            let transmittance = if closure_flag.contains(ShaderFlags::EXTINCTION) {
                volume_color_transmittance(coeff.sigma_t, dt)
            } else {
                Spectrum::one()
            };
            if write_denoising {
                let albedo = coeff.sigma_s.safe_divide(coeff.sigma_t, 0.0);
                accum.albedo += result.indirect_throughput * albedo * (Spectrum::one() - transmittance);
            }
            volume_ray_marching_step_scattering(ray, equiangular, &coeff, &phases, transmittance, vstep.t, vstate, result);
        } else if closure_flag.contains(ShaderFlags::EXTINCTION) {
            extinction.add(coeff.sigma_t * dt);
            if let Some(transmittance) = extinction.flush(false) {
                apply_transmittance(result, transmittance);
            }
        }

        // throughputs are only current once the batch is applied
        if extinction.pending() == 0 {
            result.cut_off_throughput(vstate.direct_sample_method);
            if result.should_stop() {
                break;
            }
        }
    }
    if let Some(transmittance) = extinction.flush(true) {
        apply_transmittance(result, transmittance);
    }
    accum
}

/// Closed form integration of a segment through homogeneous media: one scatter-or-transmit
/// decision with probability `1 - T`, truncated exponential distance sampling inside.
#[allow(clippy::too_many_arguments)]
fn volume_integrate_homogeneous<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    equiangular: &EquiangularCoefficients,
    vstate: &mut VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) -> VolumeAccum {
    let mut accum = VolumeAccum::default();
    sd.p = ray.at(ray.tmin);
    let Some((coeff, phases)) = volume_shader_sample(kg, &state.path, &state.volume_stack, sd) else {
        return accum;
    };
    let closure_flag = sd.flag;
    let ray_length = ray.tmax - ray.tmin;
    let throughput = state.path.throughput;
    accum.optical_depth = coeff.sigma_t.max_element() * ray_length;

    if closure_flag.contains(ShaderFlags::EMISSION) {
        accum.emission = throughput * volume_emission_integrate(&coeff, closure_flag, ray_length);
    }

    let transmittance = volume_color_transmittance(coeff.sigma_t, ray_length);
    if !closure_flag.contains(ShaderFlags::SCATTER) || coeff.sigma_s.is_zero() {
        result.indirect_throughput *= transmittance;
        result.direct_throughput *= transmittance;
        return accum;
    }

    let albedo = coeff.sigma_s.safe_divide(coeff.sigma_t, 0.0);
    let attenuation = Spectrum::one() - transmittance;
    let multiple_albedo = albedo * attenuation * throughput;
    if state.path.flag.contains(PathRayFlag::DENOISING_FEATURES) {
        accum.albedo = throughput * albedo * attenuation;
    }

    // indirect: scatter with probability 1 - T, else pass through
    {
        let (channel, channel_pdf) =
            volume_sample_channel(multiple_albedo + transmittance, throughput, &mut vstate.rchannel);
        let scatter_prob = attenuation;
        let scatter_pdf_channel = scatter_prob[channel];
        if vstate.rscatter < scatter_pdf_channel {
            vstate.rscatter /= scatter_pdf_channel;
            let t_range = Interval::new(0.0, ray_length);
            let dt = sample_exponential_distribution(vstate.rscatter, coeff.sigma_t[channel], t_range);
            let distance_pdf = pdf_exponential_distribution(dt, coeff.sigma_t, t_range);
            let indirect_distance_pdf = (distance_pdf * scatter_prob).dot(channel_pdf);
            if indirect_distance_pdf > 0.0 && !t_range.is_empty() {
                result.indirect_scatter = true;
                result.indirect_t = ray.tmin + dt;
                result.indirect_throughput *=
                    coeff.sigma_s * volume_color_transmittance(coeff.sigma_t, dt) / indirect_distance_pdf;
                result.indirect_phases = phases.clone();
            } else {
                result.indirect_throughput = Spectrum::zero();
            }
        } else {
            let indirect_distance_pdf = (Spectrum::one() - scatter_prob).dot(channel_pdf);
            result.indirect_throughput *= transmittance / indirect_distance_pdf;
            vstate.rscatter = (vstate.rscatter - scatter_pdf_channel) / (1.0 - scatter_pdf_channel);
        }
    }

    if vstate.direct_sample_method == VolumeSampleMethod::None {
        return accum;
    }

    let t_range = Interval::new(
        equiangular.t_range.min - ray.tmin,
        equiangular.t_range.max - ray.tmin,
    );
    result.direct_scatter = !t_range.is_empty();
    result.direct_phases = phases;
    let (channel, channel_pdf) = volume_sample_channel(multiple_albedo, throughput, &mut vstate.rchannel);
    if vstate.direct_sample_method == VolumeSampleMethod::Distance {
        let dt = sample_exponential_distribution(vstate.rscatter, coeff.sigma_t[channel], t_range);
        result.direct_t = ray.tmin + dt;
        vstate.distance_pdf = pdf_exponential_distribution(dt, coeff.sigma_t, t_range).dot(channel_pdf);
        if vstate.distance_pdf > 0.0 {
            result.direct_throughput *=
                coeff.sigma_s * volume_color_transmittance(coeff.sigma_t, dt) / vstate.distance_pdf;
        } else {
            result.direct_scatter = false;
        }
    } else {
        debug_assert_eq!(vstate.direct_sample_method, VolumeSampleMethod::Equiangular);
        let dt = result.direct_t - ray.tmin;
        if vstate.equiangular_pdf > VOLUME_SAMPLE_PDF_CUTOFF {
            result.direct_throughput *=
                coeff.sigma_s * volume_color_transmittance(coeff.sigma_t, dt) / vstate.equiangular_pdf;
        } else {
            result.direct_scatter = false;
        }
        if vstate.use_mis {
            vstate.distance_pdf = pdf_exponential_distribution(dt, coeff.sigma_t, t_range).dot(channel_pdf);
        }
    }
    volume_direct_scatter_mis(ray, equiangular, vstate, result);
    accum
}

/// One-sample MIS between distance and equiangular sampling of the direct scatter.
pub(crate) fn volume_direct_scatter_mis(
    ray: &Ray,
    equiangular: &EquiangularCoefficients,
    vstate: &VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) {
    if !vstate.use_mis || !result.direct_scatter {
        return;
    }
    let mis_weight = if vstate.direct_sample_method == VolumeSampleMethod::Distance {
        let equiangular_pdf = volume_equiangular_pdf(ray, equiangular, result.direct_t);
        power_heuristic(vstate.distance_pdf, equiangular_pdf)
    } else {
        power_heuristic(vstate.equiangular_pdf, vstate.distance_pdf)
    };
    result.direct_throughput *= 2.0 * mis_weight;
}

/// Re-samples the light from the direct scatter point and queues a shadow path toward it.
fn integrate_volume_direct_light<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    sd: &ShaderData,
    p: Vec3,
    phases: &ShaderVolumePhases,
    throughput: Spectrum,
) {
    let path = &state.path;
    let rng = path.rng_state();
    let rand_light = path_state_rng_3d(kg.data, &rng, dim::LIGHT);
    let Some(ls) = kg.scene.sample_light(
        rand_light,
        sd.time,
        p,
        Vec3::ZERO,
        ShaderFlags::BSDF_HAS_TRANSMISSION,
        path.bounce,
        path.flag.bits(),
    ) else {
        return;
    };
    if ls.shader_flags.contains(ShaderFlags::EXCLUDE_SCATTER) || ls.pdf <= 0.0 {
        return;
    }

    let mut scatter_sd = sd.clone();
    scatter_sd.p = p;
    let (mut phase_eval, phase_pdf) = kg.scene.eval_phase(&scatter_sd, phases, ls.d);
    let mis_weight = if kg.data.integrator.use_light_mis && ls.shader_flags.contains(ShaderFlags::USE_MIS) {
        power_heuristic(ls.pdf, phase_pdf)
    } else {
        1.0
    };
    phase_eval.mul(ls.eval * (mis_weight / ls.pdf));
    let terminate = path_state_rng_light_termination(kg.data, &rng);
    if light_sample_terminate(kg.data, &mut phase_eval, terminate) || phase_eval.is_zero() {
        return;
    }

    let shadow_ray = Ray {
        o: p,
        d: ls.d,
        tmin: 0.0,
        tmax: ls.t,
        time: sd.time,
        differential: Differential::default(),
        self_object: ls.object,
        self_prim: ls.prim,
    };

    let mut flag = path.flag;
    let mut shadow = ShadowPathState::from_path(path, flag, throughput * phase_eval.sum, shadow_ray);
    if !flag.intersects(PathRayFlag::ANY_PASS) {
        // direct light, no diffuse/glossy split for volumes
        flag |= PathRayFlag::VOLUME_PASS;
        shadow.pass_diffuse_weight = Spectrum::one();
        shadow.pass_glossy_weight = Spectrum::zero();
    }
    if path.bounce == 0 {
        flag |= PathRayFlag::VOLUME_SCATTER;
    }
    shadow.flag = flag;
    shadow.lightgroup = ls.group.map_or(0, |g| g + 1);
    shadow.volume_stack = state.volume_stack.clone();
    kg.spawn_shadow_path(shadow);
}

/// Samples a new direction at `sd.p` from the phase functions and continues the path.
fn integrate_volume_phase_scatter<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    ray: &Ray,
    phases: &ShaderVolumePhases,
) -> bool {
    let rand_phase = path_state_rng_2d(kg.data, &state.path.rng_state(), dim::VOLUME_PHASE);
    let Some(sample) = kg.scene.sample_phase(sd, phases, rand_phase) else {
        return false;
    };
    if sample.pdf == 0.0 || sample.eval.is_zero() {
        return false;
    }

    state.ray = Ray {
        o: sd.p,
        d: sample.wo.normalize(),
        tmin: 0.0,
        tmax: f32::MAX,
        time: ray.time,
        differential: ray.differential,
        self_object: sd.object,
        self_prim: sd.prim,
    };

    let path = &mut state.path;
    path.throughput *= sample.eval.sum / sample.pdf;
    if path.bounce == 0 {
        path.pass_diffuse_weight = Spectrum::one();
        path.pass_glossy_weight = Spectrum::zero();
    }
    path.mis_ray_pdf = sample.pdf;
    path.min_ray_pdf = path.min_ray_pdf.min(sample.pdf);
    path_state_next(kg.data, state, sample.label, sd.flag);
    true
}

fn volume_integrate_event<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    mut result: VolumeIntegrateResult,
) -> VolumeIntegrateEvent {
    // emission and absorption were still integrated for MIS, scattering is not
    let continuation_probability = if state.path.termination == Termination::TerminateInNextVolume {
        0.0
    } else {
        state.path.continuation_probability
    };
    if continuation_probability == 0.0 {
        return VolumeIntegrateEvent::Missed;
    }

    if result.direct_scatter {
        let direct_p = ray.at(result.direct_t);
        let throughput = result.direct_throughput / continuation_probability;
        integrate_volume_direct_light(kg, state, sd, direct_p, &result.direct_phases, throughput);
    }

    // attenuated paths get the division at the next surface
    if result.indirect_scatter {
        result.indirect_throughput /= continuation_probability;
    }
    state.path.throughput = result.indirect_throughput;

    if result.indirect_scatter {
        sd.p = ray.at(result.indirect_t);
        if integrate_volume_phase_scatter(kg, state, sd, ray, &result.indirect_phases) {
            return VolumeIntegrateEvent::Scattered;
        }
        return VolumeIntegrateEvent::Missed;
    }
    if state.path.throughput.is_zero() {
        return VolumeIntegrateEvent::Missed;
    }
    VolumeIntegrateEvent::Attenuated
}

/// Integrates `ray` through the media of the path's volume stack. With `ray_marching`
/// false, homogeneous stacks are integrated in closed form and heterogeneous ones by
/// delta tracking.
pub fn volume_integrate<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    ray: &Ray,
    ray_marching: bool,
) -> VolumeIntegrateEvent {
    if state.volume_stack.is_empty() {
        return VolumeIntegrateEvent::Attenuated;
    }
    // light linking would need the actual volume, the bottom of the stack stands in
    let mut sd = kg.scene.shader_setup_from_volume(ray, state.volume_stack[0].object);

    let mut equiangular = EquiangularCoefficients {
        p: Vec3::ZERO,
        t_range: ray.interval(),
    };
    let direct_sample_method = volume_direct_sample_method(kg, state, ray, &sd, &mut equiangular);
    let rng = state.path.rng_state();
    let mut vstate = VolumeRayMarchingState::new(kg.data, &rng, direct_sample_method);
    let mut result = VolumeIntegrateResult::new(
        state.path.throughput,
        vstate.direct_sample_method != VolumeSampleMethod::None,
    );
    if vstate.direct_sample_method == VolumeSampleMethod::Equiangular {
        let (t, pdf) = volume_equiangular_sample(ray, &equiangular, vstate.rscatter);
        result.direct_t = t;
        vstate.equiangular_pdf = pdf;
    }

    let step_size = volume_stack_step_size(kg.data, kg.scene, &state.volume_stack);
    let accum = if ray_marching {
        volume_integrate_ray_marching(kg, state, ray, &mut sd, step_size, &equiangular, &mut vstate, &mut result)
    } else if step_size == f32::MAX {
        volume_integrate_homogeneous(kg, state, ray, &mut sd, &equiangular, &mut vstate, &mut result)
    } else {
        volume_integrate_heterogeneous(kg, state, ray, &mut sd, &equiangular, &mut vstate, &mut result)
    };
    if state.path.bounce == 0 {
        state.path.optical_depth += accum.optical_depth;
    }

    if !accum.emission.is_zero() {
        let lightgroup = kg.scene.object_lightgroup(sd.object);
        film_write_volume_emission(kg.data, kg.render_buffer, &state.path, accum.emission, lightgroup);
    }
    if state.path.flag.contains(PathRayFlag::DENOISING_FEATURES) {
        film_write_denoising_features_volume(
            kg.data,
            kg.render_buffer,
            &mut state.path,
            accum.albedo,
            result.indirect_scatter,
        );
    }

    volume_integrate_event(kg, state, ray, &mut sd, result)
}

/// The segment ends at the persisted intersection, or at infinity after a miss.
pub(crate) fn integrator_shade_volume_setup(state: &mut IntegratorState) -> Ray {
    let mut ray = state.ray;
    if state.isect.is_hit() {
        ray.tmax = state.isect.t;
    } else {
        ray.tmax = f32::MAX;
        volume_stack_clean(&mut state.volume_stack);
    }
    ray
}

pub fn integrator_shade_volume<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, ray_marching: bool) {
    let ray = integrator_shade_volume_setup(state);
    match volume_integrate(kg, state, &ray, ray_marching) {
        VolumeIntegrateEvent::Missed => state.terminate(),
        VolumeIntegrateEvent::Attenuated => integrator_intersect_next_kernel_after_volume(kg, state),
        VolumeIntegrateEvent::Scattered => state.next_kernel(DeviceKernel::IntersectClosest),
    }
}
