//! Null-scattering integration of heterogeneous media.
//!
//! The media are padded with fictitious particles up to a majorant density, so free flight
//! distances can be sampled in closed form. Weighted delta tracking picks the scatter
//! positions, ratio tracking with a telescoping debiasing term gives the transmittance of
//! shadow rays.
use crate::path_state::*;
use crate::shade_volume::*;
use crate::volume_stack::VolumeSampleMethod;
use crate::*;

/// Heterogeneous segments without known bounds are shaded at this many points.
const EXTREMA_ESTIMATE_SAMPLES: u32 = 4;
/// Russian roulette only applies below this indirect throughput.
pub const VOLUME_RR_THRESHOLD: f32 = 0.05;
/// Success probability of the geometric distribution over debiasing orders.
const EXPANSION_SUCCESS: f32 = 0.9;
const EXPANSION_CUTOFF: u32 = 4;

const INTEGRATE_SCRAMBLE: u32 = 0xe35fad82;
const SHADOW_SCRAMBLE: u32 = 0x8647ace4;

/// Segments of rays that miss everything end at `f32::MAX`.
fn segment_is_bounded(t: Interval) -> bool {
    t.max < f32::MAX && t.length().is_finite()
}

#[allow(clippy::too_many_arguments)]
fn volume_entry_extrema<S: SceneServices>(
    kg: &KernelGlobals<S>,
    entry: VolumeStackEntry,
    ray: &Ray,
    sd: &mut ShaderData,
    rng: &RngState,
    t: Interval,
    path_flag: u32,
    shadow: bool,
) -> Extrema {
    if let Some(bounds) = kg.scene.volume_extinction_bounds(entry, ray, t) {
        return bounds;
    }
    let homogeneous = !kg
        .scene
        .shader_flags(entry.shader)
        .contains(ShaderFlags::HETEROGENEOUS_VOLUME);
    let length = t.length();
    let bounded = segment_is_bounded(t);
    // an unbounded segment is only shaded at its start
    let samples = if homogeneous || !bounded {
        1
    } else {
        EXTREMA_ESTIMATE_SAMPLES
    };
    let shade_offset = if homogeneous {
        0.5
    } else {
        path_state_rng_1d(kg.data, rng, dim::VOLUME_SHADE_OFFSET)
    };
    let step_size = if bounded { length / samples as f32 } else { 0.0 };

    let mut extrema = Extrema::empty();
    for i in 0..samples {
        sd.p = ray.at(t.min + (shade_offset + i as f32) * step_size);
        let sigma = if shadow {
            kg.scene.eval_volume_extinction(sd, entry, path_flag).max_element()
        } else {
            let shading = kg.scene.eval_volume(sd, entry, path_flag);
            let mut sigma = 0.0f32;
            if shading.flag.contains(ShaderFlags::EXTINCTION) {
                sigma = shading.coeff.sigma_t.max_element();
            }
            if shading.flag.contains(ShaderFlags::EMISSION) {
                sigma = sigma.max(shading.coeff.emission.max_element());
            }
            sigma
        };
        extrema = extrema.merge(sigma);
    }
    if !homogeneous {
        // the shaded points can miss the peaks in between
        extrema.max = (extrema.max * 1.5).max(0.5);
    }
    extrema
}

/// Extinction bounds of the whole stack over `t`, the sum of the bounds of each volume.
#[allow(clippy::too_many_arguments)]
pub fn volume_stack_extrema<S: SceneServices>(
    kg: &KernelGlobals<S>,
    stack: &VolumeStack,
    ray: &Ray,
    sd: &mut ShaderData,
    rng: &RngState,
    t: Interval,
    path_flag: u32,
    shadow: bool,
) -> Extrema {
    let mut sigma = Extrema::new(0.0, 0.0);
    for entry in stack.iter() {
        sigma = sigma + volume_entry_extrema(kg, *entry, ray, sd, rng, t, path_flag, shadow);
    }
    sigma
}

/// Transmittance of the media in `stack` over `t`.
///
/// A biased estimate from `k` shaded points, with `k` growing with the optical thickness of
/// `sigma_c` (majorant minus minorant), plus one randomly picked term of the telescoping
/// series that removes the bias. Averages of `N = 2^order` interleaved estimates share the
/// shaded points across orders.
#[allow(clippy::too_many_arguments)]
pub fn volume_transmittance<S: SceneServices>(
    kg: &KernelGlobals<S>,
    stack: &VolumeStack,
    ray: &Ray,
    sd: &mut ShaderData,
    sigma_c: f32,
    t: Interval,
    rng: &RngState,
    path_flag: u32,
) -> Spectrum {
    let length = t.length();
    let k = ((sigma_c * length).round() as u32).clamp(1, kg.data.integrator.volume_max_steps.max(1));

    // every pixel draws the same order so the amount of shading stays uniform
    let order_rng = RngState { rng_hash: 0, ..*rng };
    let (n, pmf) = if sigma_c == 0.0 {
        (1, 1.0)
    } else {
        let rand = path_state_rng_1d(kg.data, &order_rng, dim::VOLUME_EXPANSION_ORDER);
        let (order, pmf) = sample_geometric_distribution(rand, EXPANSION_SUCCESS, EXPANSION_CUTOFF);
        (1u32 << order, pmf)
    };

    let samples = n * k;
    let shade_offset = path_state_rng_1d(kg.data, rng, dim::VOLUME_SHADE_OFFSET);
    let step_size = length / samples as f32;
    let mut extinction_at = |step: u32| {
        sd.p = ray.at(t.max.min(t.min + (shade_offset + step as f32) * step_size));
        volume_extinction(kg, stack, sd, path_flag)
    };

    if n == 1 {
        let mut tau_k = Spectrum::zero();
        for i in 0..k {
            tau_k += extinction_at(i);
        }
        if tau_k.is_zero() {
            return Spectrum::one();
        }
        return (-tau_k * step_size).exp();
    }

    let mut tau_j = [Spectrum::zero(); 2];
    let mut tau_j_1 = Spectrum::zero();
    let mut t_k = Spectrum::zero();
    for estimate in 0..n {
        let mut tau_k = Spectrum::zero();
        for i in 0..k {
            let step = i * n + estimate;
            let tau = extinction_at(step) * step_size;
            tau_k += tau * n as f32;
            tau_j[(step % 2) as usize] += tau * 2.0;
            tau_j_1 += tau;
        }
        t_k += (-tau_k).exp();
    }
    t_k /= n as f32;
    let t_j = ((-tau_j[0]).exp() + (-tau_j[1]).exp()) * 0.5;
    t_k + ((-tau_j_1).exp() - t_j) / pmf
}

/// Transmittance of a shadow ray through its volume stack, multiplied into `throughput`.
pub fn volume_shadow_null_scattering<S: SceneServices>(
    kg: &KernelGlobals<S>,
    shadow: &ShadowPathState,
    ray: &Ray,
    throughput: &mut Spectrum,
) {
    let stack = &shadow.volume_stack;
    let t = ray.interval();
    if stack.is_empty() || t.is_empty() {
        return;
    }
    if !segment_is_bounded(t) {
        // unbounded rays need the fixed step budget of ray marching
        volume_shadow_ray_marching(kg, shadow, ray, throughput);
        return;
    }
    let mut rng = shadow.rng_state();
    path_state_rng_scramble(&mut rng, SHADOW_SCRAMBLE);
    rng.rng_offset += dim::BOUNCE_NUM;

    let path_flag = PathRayFlag::SHADOW.bits();
    let mut sd = kg.scene.shader_setup_from_volume(ray, stack[0].object);
    let sigma = volume_stack_extrema(kg, stack, ray, &mut sd, &rng, t, path_flag, true);
    *throughput *= volume_transmittance(kg, stack, ray, &mut sd, sigma.range(), t, &rng, path_flag);
}

/// First real scatter event of the walk.
#[derive(Clone, Debug)]
struct ScatterCandidate {
    t: f32,
    throughput: Spectrum,
    distance_pdf: f32,
    emission: Spectrum,
    albedo: Spectrum,
    phases: ShaderVolumePhases,
}

/// Cursor of a delta tracking walk along one segment.
#[derive(Clone, Debug)]
struct NullScatteringWalk {
    /// Picks real or null events, rescaled after each use.
    rand: f32,
    t: f32,
    dt: f32,
    step: u32,
    /// Product of the null event probabilities so far.
    transmittance: f32,
    /// Majorant and free flight in effect when the walk passed the equiangular position.
    sigma_max: f32,
    sample_dt: f32,
    direct_rr_scale: f32,
    emission: Spectrum,
    albedo: Spectrum,
    candidate: Option<ScatterCandidate>,
}

impl NullScatteringWalk {
    fn new(rand: f32, tmin: f32) -> Self {
        Self {
            rand,
            t: tmin,
            dt: 0.0,
            step: 0,
            transmittance: 1.0,
            sigma_max: 0.0,
            sample_dt: f32::MAX,
            direct_rr_scale: 1.0,
            emission: Spectrum::zero(),
            albedo: Spectrum::zero(),
            candidate: None,
        }
    }
}

/// Returns `(majorant, sigma_n)`. Points denser than `sigma_max` raise the majorant locally.
fn volume_null_event_coefficients(sigma_t: Spectrum, sigma_max: f32) -> (f32, Spectrum) {
    let majorant = sigma_t.max_element().max(sigma_max);
    (majorant, Spectrum::splat(majorant) - sigma_t)
}

/// Probability of a real scatter event. Absorption is never sampled since it ends the walk
/// with zero weight.
fn volume_scatter_probability(coeff: &VolumeShaderCoefficients, sigma_n: Spectrum, throughput: Spectrum) -> f32 {
    let sigma_c = coeff.sigma_s + sigma_n;
    let albedo = coeff.sigma_s.safe_divide(coeff.sigma_t, 1.0);
    let channel_pdf = volume_sample_channel_pdf(albedo, throughput);
    coeff.sigma_s.safe_divide(sigma_c, 0.0).dot(channel_pdf)
}

#[allow(clippy::too_many_arguments)]
fn volume_equiangular_transmittance<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    sigma: Extrema,
    segment: Interval,
    rng: &RngState,
    vstate: &VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) {
    if vstate.direct_sample_method != VolumeSampleMethod::Equiangular || vstate.use_mis || result.direct_scatter {
        return;
    }
    let t = if segment.contains(result.direct_t) {
        result.direct_scatter = true;
        Interval::new(segment.min, result.direct_t)
    } else {
        segment
    };
    let path_flag = state.path.flag.bits();
    result.direct_throughput *=
        volume_transmittance(kg, &state.volume_stack, ray, sd, sigma.range(), t, rng, path_flag);
}

/// Samples the next free flight. Returns false once the walk leaves the segment or runs out
/// of steps.
fn volume_null_scattering_advance<S: SceneServices>(
    kg: &KernelGlobals<S>,
    rng: &mut RngState,
    segment: Interval,
    sigma_max: f32,
    vstate: &mut VolumeRayMarchingState,
    walk: &mut NullScatteringWalk,
    result: &mut VolumeIntegrateResult,
) -> bool {
    if sigma_max == 0.0 || walk.step > kg.data.integrator.volume_max_steps {
        return false;
    }
    walk.step += 1;
    let rscatter = path_state_rng_1d(kg.data, rng, dim::VOLUME_SCATTER_DISTANCE);
    rng.rng_offset += dim::BOUNCE_NUM;
    walk.dt = sample_exponential_distribution(rscatter, sigma_max, Interval::new(0.0, f32::INFINITY));
    walk.t += walk.dt;

    let equiangular = vstate.direct_sample_method == VolumeSampleMethod::Equiangular && vstate.use_mis;
    if equiangular && !result.direct_scatter && walk.t > result.direct_t && segment.contains(result.direct_t) {
        result.direct_scatter = true;
        result.direct_throughput = result.indirect_throughput * walk.transmittance * walk.direct_rr_scale;
        walk.sample_dt = result.direct_t - walk.t + walk.dt;
        walk.sigma_max = sigma_max;
        vstate.distance_pdf = walk.transmittance * sigma_max;
    }
    walk.t <= segment.max
}

/// Returns true when the walk has nothing left to find.
fn volume_russian_roulette_termination(
    state: &IntegratorState,
    vstate: &VolumeRayMarchingState,
    walk: &mut NullScatteringWalk,
    result: &mut VolumeIntegrateResult,
) -> bool {
    if result.direct_scatter && result.indirect_scatter {
        return true;
    }
    let thresh = result.indirect_throughput.abs().max_element();
    if thresh > VOLUME_RR_THRESHOLD {
        return false;
    }

    // an equiangular direct throughput is still derived from the indirect one
    let equiangular = vstate.direct_sample_method == VolumeSampleMethod::Equiangular
        && vstate.use_mis
        && !result.direct_scatter;
    let has_scatter_sample = walk.candidate.is_some() && !equiangular;
    let absorption_only = state.path.termination.is_requested();

    if absorption_only || has_scatter_sample {
        if thresh == 0.0 || walk.rand > thresh {
            result.indirect_throughput = Spectrum::zero();
            if equiangular || vstate.direct_sample_method == VolumeSampleMethod::Distance {
                result.direct_throughput = Spectrum::zero();
            }
            return true;
        }
        walk.rand = (walk.rand / thresh).clamp(0.0, 1.0);
        result.indirect_throughput /= thresh;
    }

    if equiangular {
        if thresh == 0.0 || walk.rand > thresh {
            result.direct_scatter = true;
            result.direct_throughput = Spectrum::zero();
            walk.rand = (walk.rand - thresh) / (1.0 - thresh);
        } else {
            walk.rand /= thresh;
            walk.direct_rr_scale /= thresh;
        }
        walk.rand = walk.rand.clamp(0.0, 1.0);
    }
    false
}

/// One collision of the walk. The estimator at each collision is
/// `T / p (Le + σs Ls + σn L)` with `T / p = 1 / majorant`; the real or null event is
/// chosen with probability proportional to `σs` and `|σn|`.
#[allow(clippy::too_many_arguments)]
fn volume_null_scattering_step<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sigma_max: f32,
    sd: &mut ShaderData,
    vstate: &VolumeRayMarchingState,
    walk: &mut NullScatteringWalk,
    result: &mut VolumeIntegrateResult,
) {
    if volume_russian_roulette_termination(state, vstate, walk, result) {
        return;
    }
    sd.p = ray.at(walk.t);
    let Some((coeff, phases)) = volume_shader_sample(kg, &state.path, &state.volume_stack, sd) else {
        return;
    };

    let (majorant, sigma_n) = volume_null_event_coefficients(coeff.sigma_t, sigma_max);
    if majorant != sigma_max {
        // the flight was sampled with sigma_max, reweight to the local majorant
        result.indirect_throughput *= ((sigma_max - majorant) * walk.dt).exp() / sigma_max;
    } else {
        result.indirect_throughput /= majorant;
    }

    if sd.flag.contains(ShaderFlags::EMISSION) && !result.indirect_scatter {
        walk.emission += result.indirect_throughput * coeff.emission;
    }

    if !sd.flag.contains(ShaderFlags::SCATTER) || coeff.sigma_s.is_zero() {
        // absorption only, always a null event
        result.indirect_throughput *= sigma_n;
        return;
    }

    if state.path.flag.contains(PathRayFlag::DENOISING_FEATURES) && !result.indirect_scatter {
        walk.albedo += result.indirect_throughput * coeff.sigma_s;
    }

    let prob_s = volume_scatter_probability(&coeff, sigma_n, result.indirect_throughput);
    if !result.indirect_scatter {
        if prob_s > 0.0 && walk.rand <= prob_s {
            walk.rand /= prob_s;
            result.indirect_scatter = true;
            walk.candidate = Some(ScatterCandidate {
                t: walk.t,
                throughput: result.indirect_throughput * coeff.sigma_s / prob_s,
                distance_pdf: walk.transmittance * prob_s * sigma_max,
                emission: walk.emission,
                albedo: walk.albedo,
                phases,
            });
            if vstate.direct_sample_method == VolumeSampleMethod::Distance {
                result.direct_scatter = true;
            }
        } else {
            walk.rand = (walk.rand - prob_s) / (1.0 - prob_s);
        }
        walk.rand = walk.rand.clamp(0.0, 1.0);
    }

    let prob_n = 1.0 - prob_s;
    result.indirect_throughput = if prob_n > 0.0 {
        result.indirect_throughput * sigma_n / prob_n
    } else {
        Spectrum::zero()
    };
    walk.transmittance *= prob_n;
}

fn volume_null_scattering_should_stop(vstate: &VolumeRayMarchingState, result: &VolumeIntegrateResult) -> bool {
    if result.indirect_throughput.is_zero() && result.direct_throughput.is_zero() {
        return true;
    }
    let direct_done = result.direct_scatter || vstate.direct_sample_method == VolumeSampleMethod::None;
    result.indirect_scatter && direct_done
}

/// Moves the scatter event into `result`. Distance sampling shares it with the direct light.
fn volume_null_scattering_finalize(
    state: &IntegratorState,
    vstate: &mut VolumeRayMarchingState,
    walk: &mut NullScatteringWalk,
    result: &mut VolumeIntegrateResult,
) {
    let Some(candidate) = walk.candidate.take() else {
        return;
    };
    result.indirect_throughput = candidate.throughput;
    result.indirect_t = candidate.t;
    walk.emission = candidate.emission;
    walk.albedo = candidate.albedo;
    if !state.path.termination.is_requested() && vstate.direct_sample_method == VolumeSampleMethod::Distance {
        result.direct_scatter = true;
        result.direct_t = candidate.t;
        result.direct_throughput = candidate.throughput;
        result.direct_phases = candidate.phases.clone();
        if vstate.use_mis {
            vstate.distance_pdf = candidate.distance_pdf;
        }
    }
    result.indirect_phases = candidate.phases;
}

/// Shades the equiangular position and completes the direct throughput there.
fn volume_equiangular_direct_scatter<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    vstate: &mut VolumeRayMarchingState,
    walk: &NullScatteringWalk,
    result: &mut VolumeIntegrateResult,
) {
    if vstate.direct_sample_method != VolumeSampleMethod::Equiangular || !result.direct_scatter {
        return;
    }
    if result.direct_throughput.is_zero() || vstate.equiangular_pdf <= VOLUME_SAMPLE_PDF_CUTOFF {
        result.direct_scatter = false;
        return;
    }
    sd.p = ray.at(result.direct_t);
    match volume_shader_sample(kg, &state.path, &state.volume_stack, sd) {
        Some((coeff, phases)) if sd.flag.contains(ShaderFlags::SCATTER) => {
            if vstate.use_mis {
                let (majorant, sigma_n) = volume_null_event_coefficients(coeff.sigma_t, walk.sigma_max);
                if walk.sample_dt != f32::MAX && majorant != walk.sigma_max {
                    result.direct_throughput *= ((walk.sigma_max - majorant) * walk.sample_dt).exp();
                }
                vstate.distance_pdf *= volume_scatter_probability(&coeff, sigma_n, result.direct_throughput);
            }
            result.direct_throughput *= coeff.sigma_s / vstate.equiangular_pdf;
            result.direct_phases = phases;
        }
        _ => result.direct_scatter = false,
    }
}

/// Weighted delta tracking through a heterogeneous volume stack. The walk stops at the first
/// real scatter event once the direct position is known as well.
#[allow(clippy::too_many_arguments)]
pub(crate) fn volume_integrate_heterogeneous<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    ray: &Ray,
    sd: &mut ShaderData,
    equiangular: &EquiangularCoefficients,
    vstate: &mut VolumeRayMarchingState,
    result: &mut VolumeIntegrateResult,
) -> VolumeAccum {
    let mut accum = VolumeAccum::default();
    let segment = ray.interval();
    if segment.is_empty() {
        return accum;
    }
    let path_flag = state.path.flag.bits();
    let mut rng = state.path.rng_state();
    let sigma = volume_stack_extrema(kg, &state.volume_stack, ray, sd, &rng, segment, path_flag, false);
    if sigma.max > 0.0 {
        accum.optical_depth = sigma.max * segment.length();
    }

    let mut walk = NullScatteringWalk::new(path_state_rng_1d(kg.data, &rng, dim::VOLUME_RESERVOIR), segment.min);
    path_state_rng_scramble(&mut rng, INTEGRATE_SCRAMBLE);
    volume_equiangular_transmittance(kg, state, ray, sd, sigma, segment, &rng, vstate, result);

    let sigma_max = sigma.max;
    while volume_null_scattering_advance(kg, &mut rng, segment, sigma_max, vstate, &mut walk, result) {
        volume_null_scattering_step(kg, state, ray, sigma_max, sd, vstate, &mut walk, result);
        if volume_null_scattering_should_stop(vstate, result) {
            break;
        }
    }

    volume_null_scattering_finalize(state, vstate, &mut walk, result);
    volume_equiangular_direct_scatter(kg, state, ray, sd, vstate, &walk, result);
    volume_direct_scatter_mis(ray, equiangular, vstate, result);
    accum.emission = walk.emission;
    accum.albedo = walk.albedo;
    accum
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::*;
    use std::sync::atomic::Ordering;
    use wavepath_common::statrs::assert_almost_eq;
    use wavepath_core::hash::hash_uint;

    fn heterogeneous(scene: &mut MockScene, shading: VolumeShading) {
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME | ShaderFlags::HETEROGENEOUS_VOLUME);
        scene.volumes.insert(1, shading);
        scene.volume_step_size = 0.1;
    }

    /// Runs `n` independent samples of one segment, returning the events and the final
    /// path throughputs.
    fn integrate_samples(
        scene: &MockScene,
        length: f32,
        n: u32,
        setup: impl Fn(&mut IntegratorState),
    ) -> Vec<(VolumeIntegrateEvent, Spectrum)> {
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(scene);
        (0..n)
            .map(|i| {
                let mut state = in_volume(&harness, &kg, 1, length);
                state.path.rng_hash = hash_uint(i);
                setup(&mut state);
                let ray = integrator_shade_volume_setup(&mut state);
                let event = volume_integrate(&kg, &mut state, &ray, false);
                (event, state.path.throughput)
            })
            .collect()
    }

    fn mean_throughput(samples: &[(VolumeIntegrateEvent, Spectrum)]) -> f64 {
        samples.iter().map(|(_, tp)| tp[0] as f64).sum::<f64>() / samples.len() as f64
    }

    fn scatter_fraction(samples: &[(VolumeIntegrateEvent, Spectrum)]) -> f64 {
        let scattered = samples
            .iter()
            .filter(|(event, _)| *event == VolumeIntegrateEvent::Scattered)
            .count();
        scattered as f64 / samples.len() as f64
    }

    fn shadow_through(stack: VolumeStackEntry, length: f32, rng_hash: u32) -> (ShadowPathState, Ray) {
        let mut ray = Ray::new(Vec3::ZERO, Vec3::Z);
        ray.tmax = length;
        let mut shadow =
            ShadowPathState::from_path(&PathState::default(), PathRayFlag::SHADOW_FOR_LIGHT, Spectrum::one(), ray);
        shadow.rng_hash = rng_hash;
        shadow.volume_stack.push(stack);
        (shadow, ray)
    }

    #[test]
    fn test_delta_tracking_transmittance() {
        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(1.0));
        let samples = integrate_samples(&scene, 1.0, 8192, |_| {});
        assert!(samples.iter().all(|(event, _)| *event != VolumeIntegrateEvent::Scattered));
        assert_almost_eq!(mean_throughput(&samples), (-1.0f64).exp(), 0.02);

        // linear ramp of density from 0 to 2 along the segment
        scene.volume_density = Some(|p: Vec3| p.z);
        let samples = integrate_samples(&scene, 2.0, 8192, |_| {});
        assert_almost_eq!(mean_throughput(&samples), (-2.0f64).exp(), 0.015);
    }

    #[test]
    fn test_delta_tracking_matches_analytic_scattering() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME);
        scene.volumes.insert(1, scatterer(1.0));
        let analytic = integrate_samples(&scene, 1.0, 8192, |_| {});

        let mut scene = MockScene::new();
        heterogeneous(&mut scene, scatterer(1.0));
        let tracked = integrate_samples(&scene, 1.0, 8192, |_| {});

        let expected = 1.0 - (-1.0f64).exp();
        assert_almost_eq!(scatter_fraction(&analytic), expected, 0.03);
        assert_almost_eq!(scatter_fraction(&tracked), expected, 0.03);
        // white media only change where the path goes, never its weight
        for (_, tp) in &tracked {
            assert_almost_eq!(tp[1] as f64, 1.0, 1e-3);
        }
    }

    #[test]
    fn test_russian_roulette_keeps_expectation() {
        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(3.0));
        let samples = integrate_samples(&scene, 1.0, 16384, |state| {
            state.path.request_termination(Termination::TerminateOnNextSurface)
        });
        let killed = samples.iter().filter(|(_, tp)| tp.is_zero()).count();
        assert!(killed > 0);
        assert_almost_eq!(mean_throughput(&samples), (-3.0f64).exp(), 0.008);
    }

    #[test]
    fn test_scene_bounds_used_as_majorant() {
        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(1.0));
        scene.extinction_bounds = Some(Extrema::new(1.0, 4.0));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = in_volume(&harness, &kg, 1, 0.5);
        let ray = integrator_shade_volume_setup(&mut state);
        volume_integrate(&kg, &mut state, &ray, false);
        assert_almost_eq!(state.path.optical_depth as f64, 2.0, 1e-6);

        // secondary rays leave the primary depth alone
        state.path.bounce = 1;
        state.path.throughput = Spectrum::one();
        volume_integrate(&kg, &mut state, &ray, false);
        assert_almost_eq!(state.path.optical_depth as f64, 2.0, 1e-6);
    }

    #[test]
    fn test_homogeneous_optical_depth() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME);
        scene.volumes.insert(1, absorber(0.8));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = in_volume(&harness, &kg, 1, 2.5);
        let ray = integrator_shade_volume_setup(&mut state);
        volume_integrate(&kg, &mut state, &ray, false);
        assert_almost_eq!(state.path.optical_depth as f64, 2.0, 1e-5);
    }

    #[test]
    fn test_shadow_ratio_tracking() {
        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(0.5));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let entry = VolumeStackEntry { object: 0, shader: 1 };

        // constant density is exact for any number of shaded points
        for i in 0..16 {
            let (shadow, ray) = shadow_through(entry, 3.0, hash_uint(i));
            let mut tp = Spectrum::splat(2.0);
            volume_shadow_null_scattering(&kg, &shadow, &ray, &mut tp);
            assert_almost_eq!(tp[2] as f64, 2.0 * (-1.5f64).exp(), 1e-4);
        }

        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(1.0));
        scene.volume_density = Some(|p: Vec3| p.z);
        // the expansion order is shared by all pixels of a sample, so the samples vary here
        let n = 8192;
        let harness = Harness::new(IntegratorConfig { spp: n, ..Default::default() }, 1, 1);
        let kg = harness.globals(&scene);
        let mut sum = 0.0f64;
        for i in 0..n {
            let (mut shadow, ray) = shadow_through(entry, 2.0, hash_uint(i));
            shadow.sample = i;
            let mut tp = Spectrum::one();
            volume_shadow_null_scattering(&kg, &shadow, &ray, &mut tp);
            sum += tp[0] as f64;
        }
        assert_almost_eq!(sum / n as f64, (-2.0f64).exp(), 0.012);
    }

    #[test]
    fn test_shadow_tracking_shades_sparsely() {
        let mut scene = MockScene::new();
        heterogeneous(&mut scene, absorber(0.5));
        scene.volume_step_size = 0.01;
        let entry = VolumeStackEntry { object: 0, shader: 1 };
        let (shadow, ray) = shadow_through(entry, 3.0, 7);

        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut tp = Spectrum::one();
        volume_shadow_null_scattering(&kg, &shadow, &ray, &mut tp);
        let tracked = scene.volume_evals.load(Ordering::Relaxed);
        // majorant estimate plus a handful of ratio tracking points, where marching needs 300
        assert!(tracked < 100, "{} evaluations", tracked);
        assert_almost_eq!(tp[0] as f64, (-1.5f64).exp(), 1e-4);
    }

    #[test]
    fn test_equiangular_direct_light() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(
            1,
            ShaderFlags::HAS_VOLUME | ShaderFlags::HETEROGENEOUS_VOLUME | ShaderFlags::VOLUME_EQUIANGULAR,
        );
        scene.volumes.insert(1, scatterer(0.5));
        scene.volume_step_size = 0.1;
        scene.light = Some(point_light(vec3(0.0, 1.0, 0.5), Spectrum::one(), None));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = in_volume(&harness, &kg, 1, 1.0);
        let ray = integrator_shade_volume_setup(&mut state);
        volume_integrate(&kg, &mut state, &ray, false);
        let shadows = harness.queued_shadows();
        assert_eq!(shadows.len(), 1);
        assert!(shadows[0].throughput.max_element() > 0.0);
        assert!(shadows[0].throughput.max_element().is_finite());

        // with MIS each sample picks one strategy and spawns at most one shadow path
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME | ShaderFlags::HETEROGENEOUS_VOLUME | ShaderFlags::VOLUME_MIS);
        for i in 0..32 {
            let harness = Harness::new(IntegratorConfig::default(), 1, 1);
            let kg = harness.globals(&scene);
            let mut state = in_volume(&harness, &kg, 1, 1.0);
            state.path.rng_hash = hash_uint(i);
            let ray = integrator_shade_volume_setup(&mut state);
            volume_integrate(&kg, &mut state, &ray, false);
            let shadows = harness.queued_shadows();
            assert!(shadows.len() <= 1);
            assert!(shadows.iter().all(|s| s.throughput.max_element().is_finite()));
        }
    }

    #[test]
    fn test_null_event_coefficients() {
        let (majorant, sigma_n) = volume_null_event_coefficients(Spectrum::rgb(0.5, 1.0, 0.0), 2.0);
        assert_eq!(majorant, 2.0);
        assert_eq!(sigma_n, Spectrum::rgb(1.5, 1.0, 2.0));
        // denser than the bound
        let (majorant, sigma_n) = volume_null_event_coefficients(Spectrum::splat(3.0), 2.0);
        assert_eq!(majorant, 3.0);
        assert!(sigma_n.is_zero());
    }
}
