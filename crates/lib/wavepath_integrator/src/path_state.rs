//! Path state transitions: initialization, bounce bookkeeping, visibility, Russian roulette
//! and the per-bounce random number cursor.
use crate::*;
use wavepath_core::hash::hash_hp_seeded_uint;

/// Paths give up crossing volume boundaries after this many volume-only surfaces.
pub const VOLUME_BOUNDS_MAX: u32 = 1024;

/// Snapshot of the random stream cursor of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RngState {
    pub rng_hash: u32,
    pub rng_offset: u32,
    pub sample: u32,
}

impl PathState {
    pub fn rng_state(&self) -> RngState {
        RngState {
            rng_hash: self.rng_hash,
            rng_offset: self.rng_offset,
            sample: self.sample,
        }
    }
    /// Escalates the pending termination, never downgrades it.
    pub fn request_termination(&mut self, termination: Termination) {
        self.termination = self.termination.max(termination);
    }
}

pub fn path_state_rng_1d(kg: &KernelData, rng: &RngState, dimension: u32) -> f32 {
    kg.sampling
        .sample_1d(rng.rng_hash, rng.sample, rng.rng_offset + dimension)
}

pub fn path_state_rng_2d(kg: &KernelData, rng: &RngState, dimension: u32) -> Vec2 {
    kg.sampling
        .sample_2d(rng.rng_hash, rng.sample, rng.rng_offset + dimension)
}

pub fn path_state_rng_3d(kg: &KernelData, rng: &RngState, dimension: u32) -> Vec3 {
    kg.sampling
        .sample_3d(rng.rng_hash, rng.sample, rng.rng_offset + dimension)
}

/// Decorrelates a copy of the stream from the path's own dimensions.
pub fn path_state_rng_scramble(rng: &mut RngState, seed: u32) {
    rng.rng_hash = hash_hp_seeded_uint(rng.rng_hash, seed);
}

/// Random number for stochastic light termination, only drawn when the feature is enabled.
pub fn path_state_rng_light_termination(kg: &KernelData, rng: &RngState) -> f32 {
    if kg.integrator.light_inv_rr_threshold > 0.0 {
        path_state_rng_1d(kg, rng, dim::LIGHT_TERMINATE)
    } else {
        0.0
    }
}

/// Sets the pixel a path contributes to and clears its kernel bookkeeping.
pub fn path_state_init(state: &mut IntegratorState, tile: &WorkTile, x: u32, y: u32) {
    state.path.render_pixel_index = tile.render_pixel_index(x, y);
    state.path.queued_kernel = None;
    state.path.shader_sort_key = 0;
}

pub fn path_state_init_integrator(
    kg: &KernelData,
    state: &mut IntegratorState,
    sample: u32,
    rng_hash: u32,
) {
    let render_pixel_index = state.path.render_pixel_index;
    let queued_kernel = state.path.queued_kernel;
    let mut flag = PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP | PathRayFlag::TRANSPARENT_BACKGROUND;
    if kg.has(KernelFeatures::DENOISING) {
        flag |= PathRayFlag::DENOISING_FEATURES;
    }
    state.path = PathState {
        flag,
        sample,
        rng_hash,
        rng_offset: dim::BOUNCE_NUM,
        render_pixel_index,
        queued_kernel,
        ..Default::default()
    };
    state.isect = Intersection::none();
    state.volume_stack.clear();
    state.guiding = None;
}

/// Advances the path past a scattering event with the given label.
pub fn path_state_next(kg: &KernelData, state: &mut IntegratorState, label: Label, shader_flags: ShaderFlags) {
    let config = &kg.integrator;
    let path = &mut state.path;
    let mut flag = path.flag;

    if label.intersects(Label::TRANSPARENT | Label::RAY_PORTAL) {
        flag |= PathRayFlag::TRANSPARENT;
        if label.contains(Label::RAY_PORTAL) {
            flag |= PathRayFlag::MIS_SKIP;
        }
        path.transparent_bounce += 1;
        if path.transparent_bounce >= config.transparent_max_bounce {
            path.request_termination(Termination::TerminateOnNextSurface);
        }
        path.flag = flag;
        path.rng_offset += dim::BOUNCE_NUM;
        return;
    }

    path.bounce += 1;
    if path.bounce >= config.max_bounce {
        path.request_termination(Termination::TerminateAfterTransparent);
    }
    flag.remove(PathRayFlag::ALL_VISIBILITY | PathRayFlag::MIS_SKIP);

    if label.contains(Label::VOLUME_SCATTER) {
        flag |= PathRayFlag::VOLUME_SCATTER;
        flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
        if !flag.intersects(PathRayFlag::ANY_PASS) {
            flag |= PathRayFlag::VOLUME_PASS;
        }
        path.volume_bounce += 1;
        if path.volume_bounce >= config.max_volume_bounce {
            path.request_termination(Termination::TerminateAfterTransparent);
        }
    } else {
        if label.contains(Label::REFLECT) {
            flag |= PathRayFlag::REFLECT;
            flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
            if label.contains(Label::DIFFUSE) {
                path.diffuse_bounce += 1;
                if path.diffuse_bounce >= config.max_diffuse_bounce {
                    path.request_termination(Termination::TerminateAfterTransparent);
                }
            } else {
                path.glossy_bounce += 1;
                if path.glossy_bounce >= config.max_glossy_bounce {
                    path.request_termination(Termination::TerminateAfterTransparent);
                }
            }
        } else {
            debug_assert!(label.contains(Label::TRANSMIT));
            flag |= PathRayFlag::TRANSMIT;
            if !label.contains(Label::TRANSMIT_TRANSPARENT) {
                flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
            }
            path.transmission_bounce += 1;
            if path.transmission_bounce >= config.max_transmission_bounce {
                path.request_termination(Termination::TerminateAfterTransparent);
            }
        }

        if label.contains(Label::DIFFUSE) {
            flag |= PathRayFlag::DIFFUSE | PathRayFlag::DIFFUSE_ANCESTOR;
        } else if label.contains(Label::GLOSSY) {
            flag |= PathRayFlag::GLOSSY;
        } else {
            debug_assert!(label.contains(Label::SINGULAR));
            flag |= PathRayFlag::GLOSSY | PathRayFlag::SINGULAR | PathRayFlag::MIS_SKIP;
        }

        if shader_flags.contains(ShaderFlags::BSDF_HAS_TRANSMISSION) {
            flag |= PathRayFlag::MIS_HAD_TRANSMISSION;
        }

        if !flag.intersects(PathRayFlag::ANY_PASS | PathRayFlag::TRANSPARENT_BACKGROUND) {
            flag |= if label.contains(Label::TRANSMIT) {
                PathRayFlag::TRANSMISSION_PASS
            } else {
                PathRayFlag::REFLECT_PASS
            };
        }
    }

    path.flag = flag;
    path.rng_offset += dim::BOUNCE_NUM;
}

/// Visibility mask for tracing the path's next ray.
pub fn path_state_ray_visibility(path: &PathState) -> u32 {
    let flag = path.flag;
    let mut visibility = flag & PathRayFlag::ALL_VISIBILITY;
    if flag.contains(PathRayFlag::TRANSMIT) {
        visibility.remove(PathRayFlag::DIFFUSE | PathRayFlag::GLOSSY);
    } else if flag.contains(PathRayFlag::VOLUME_SCATTER) {
        // volume scattering is treated as diffuse for visibility
        visibility |= PathRayFlag::DIFFUSE;
    }
    if flag.contains(PathRayFlag::SHADOW_CATCHER_PASS) {
        visibility.bits() << SHADOW_CATCHER_VISIBILITY_SHIFT
    } else {
        visibility.bits()
    }
}

pub fn path_state_continuation_probability(kg: &KernelData, path: &PathState, path_flag: PathRayFlag) -> f32 {
    let config = &kg.integrator;
    if path_flag.contains(PathRayFlag::TRANSPARENT) {
        if path.transparent_bounce <= config.transparent_min_bounce {
            return 1.0;
        }
    } else if path.bounce <= config.min_bounce {
        return 1.0;
    }
    path.throughput.abs().max_element().sqrt().min(1.0)
}

/// True once the path has gone past the configured number of AO bounces.
pub fn path_state_ao_bounce(kg: &KernelData, path: &PathState) -> bool {
    let ao_bounces = kg.integrator.ao_bounces;
    if ao_bounces == 0 {
        return false;
    }
    let bounce = path.bounce as i64 - path.transmission_bounce as i64
        - (path.glossy_bounce > 0) as i64
        + 1;
    bounce > ao_bounces as i64
}

/// Steps through a volume-only boundary. Returns false when the path crossed too many.
pub fn path_state_volume_next(path: &mut PathState) -> bool {
    path.volume_bounds_bounce += 1;
    if path.volume_bounds_bounce > VOLUME_BOUNDS_MAX {
        return false;
    }
    // the first crossing keeps the random stream of the surface behind it
    if path.volume_bounds_bounce > 1 {
        path.rng_offset += dim::BOUNCE_NUM;
    }
    true
}

/// Stochastically drops weak light samples. Returns true if the sample is terminated,
/// otherwise rescales `eval` to stay unbiased.
pub fn light_sample_terminate(kg: &KernelData, eval: &mut BsdfEval, rand_terminate: f32) -> bool {
    let threshold = kg.integrator.light_inv_rr_threshold;
    if threshold > 0.0 {
        let probability = eval.sum.abs().max_element() * threshold;
        if probability < 1.0 {
            if rand_terminate >= probability {
                return true;
            }
            eval.mul_f(1.0 / probability);
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use wavepath_common::statrs::assert_almost_eq;

    fn kernel_data(config: IntegratorConfig) -> KernelData {
        KernelData::new(&config).unwrap()
    }

    fn fresh_state(kg: &KernelData) -> IntegratorState {
        let mut state = IntegratorState::default();
        let tile = WorkTile::full_frame(4, 4, 1);
        path_state_init(&mut state, &tile, 1, 2);
        path_state_init_integrator(kg, &mut state, 3, 0xabc);
        state
    }

    #[test]
    fn test_init_integrator() {
        let kg = kernel_data(IntegratorConfig::default());
        let mut state = IntegratorState::default();
        state.path.bounce = 5;
        state.path.throughput = Spectrum::splat(0.1);
        state.volume_stack.push(VolumeStackEntry { object: 1, shader: 2 });
        let tile = WorkTile::full_frame(4, 4, 1);
        path_state_init(&mut state, &tile, 1, 2);
        path_state_init_integrator(&kg, &mut state, 3, 0xabc);
        assert_eq!(state.path.render_pixel_index, 9);
        assert_eq!(state.path.bounce, 0);
        assert_eq!(state.path.sample, 3);
        assert_eq!(state.path.rng_offset, dim::BOUNCE_NUM);
        assert_eq!(state.path.throughput, Spectrum::one());
        assert_eq!(state.path.min_ray_pdf, f32::INFINITY);
        assert_eq!(state.path.pass_diffuse_weight, Spectrum::one());
        assert_eq!(state.path.pass_glossy_weight, Spectrum::zero());
        assert_eq!(
            state.path.flag,
            PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP | PathRayFlag::TRANSPARENT_BACKGROUND
        );
        assert!(state.volume_stack.is_empty());
        assert_eq!(state.path.termination, Termination::Continue);
    }

    #[test]
    fn test_first_glossy_reflection() {
        let kg = kernel_data(IntegratorConfig::default());
        let mut state = fresh_state(&kg);
        path_state_next(&kg, &mut state, Label::REFLECT | Label::GLOSSY, ShaderFlags::empty());
        let path = &state.path;
        assert_eq!(path.bounce, 1);
        assert_eq!(path.glossy_bounce, 1);
        assert_eq!(path.diffuse_bounce, 0);
        assert_eq!(path.rng_offset, 2 * dim::BOUNCE_NUM);
        assert_eq!(
            path.flag,
            PathRayFlag::REFLECT | PathRayFlag::GLOSSY | PathRayFlag::REFLECT_PASS
        );
        assert_eq!(path.termination, Termination::Continue);
    }

    #[test]
    fn test_diffuse_bounce_limit() {
        let kg = kernel_data(IntegratorConfig {
            max_diffuse_bounce: 3,
            ..Default::default()
        });
        let mut state = fresh_state(&kg);
        let mut requested = vec![];
        for _ in 0..4 {
            path_state_next(&kg, &mut state, Label::REFLECT | Label::DIFFUSE, ShaderFlags::empty());
            requested.push(state.path.termination);
        }
        assert_eq!(requested[0], Termination::Continue);
        assert_eq!(requested[1], Termination::Continue);
        assert_eq!(requested[2], Termination::TerminateAfterTransparent);
        assert_eq!(requested[3], Termination::TerminateAfterTransparent);
        assert_eq!(state.path.diffuse_bounce, 4);
        assert!(state.path.flag.contains(PathRayFlag::DIFFUSE_ANCESTOR));
    }

    #[test]
    fn test_transparent_bounce() {
        let kg = kernel_data(IntegratorConfig {
            transparent_max_bounce: 2,
            ..Default::default()
        });
        let mut state = fresh_state(&kg);
        path_state_next(&kg, &mut state, Label::TRANSPARENT, ShaderFlags::empty());
        assert_eq!(state.path.bounce, 0);
        assert_eq!(state.path.transparent_bounce, 1);
        assert!(state.path.flag.contains(
            PathRayFlag::CAMERA | PathRayFlag::TRANSPARENT | PathRayFlag::TRANSPARENT_BACKGROUND
        ));
        assert_eq!(state.path.termination, Termination::Continue);
        path_state_next(&kg, &mut state, Label::TRANSPARENT, ShaderFlags::empty());
        assert_eq!(state.path.termination, Termination::TerminateOnNextSurface);
        assert_eq!(state.path.rng_offset, 3 * dim::BOUNCE_NUM);
    }

    #[test]
    fn test_termination_only_escalates() {
        let kg = kernel_data(IntegratorConfig {
            transparent_max_bounce: 1,
            max_bounce: 1,
            ..Default::default()
        });
        let mut state = fresh_state(&kg);
        path_state_next(&kg, &mut state, Label::TRANSPARENT, ShaderFlags::empty());
        assert_eq!(state.path.termination, Termination::TerminateOnNextSurface);
        path_state_next(&kg, &mut state, Label::REFLECT | Label::DIFFUSE, ShaderFlags::empty());
        assert_eq!(state.path.termination, Termination::TerminateOnNextSurface);
    }

    #[test]
    fn test_transmission_pass() {
        let kg = kernel_data(IntegratorConfig::default());
        let mut state = fresh_state(&kg);
        path_state_next(
            &kg,
            &mut state,
            Label::TRANSMIT | Label::SINGULAR,
            ShaderFlags::BSDF_HAS_TRANSMISSION,
        );
        let flag = state.path.flag;
        assert!(flag.contains(PathRayFlag::TRANSMISSION_PASS | PathRayFlag::MIS_HAD_TRANSMISSION));
        assert!(flag.contains(PathRayFlag::SINGULAR | PathRayFlag::MIS_SKIP | PathRayFlag::GLOSSY));
        assert_eq!(state.path.glossy_bounce, 0);
        assert_eq!(state.path.transmission_bounce, 1);
        // pass category sticks
        path_state_next(&kg, &mut state, Label::REFLECT | Label::DIFFUSE, ShaderFlags::empty());
        assert!(state.path.flag.contains(PathRayFlag::TRANSMISSION_PASS));
        assert!(!state.path.flag.contains(PathRayFlag::REFLECT_PASS));
    }

    #[test]
    fn test_volume_scatter_pass() {
        let kg = kernel_data(IntegratorConfig {
            max_volume_bounce: 4,
            ..Default::default()
        });
        let mut state = fresh_state(&kg);
        path_state_next(&kg, &mut state, Label::VOLUME_SCATTER, ShaderFlags::empty());
        assert!(state.path.flag.contains(PathRayFlag::VOLUME_SCATTER | PathRayFlag::VOLUME_PASS));
        assert!(!state.path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND));
        assert_eq!(state.path.volume_bounce, 1);
        assert_eq!(
            path_state_ray_visibility(&state.path),
            (PathRayFlag::VOLUME_SCATTER | PathRayFlag::DIFFUSE).bits()
        );
    }

    #[test]
    fn test_ray_visibility() {
        let mut path = PathState {
            flag: PathRayFlag::TRANSMIT | PathRayFlag::GLOSSY | PathRayFlag::REFLECT_PASS,
            ..Default::default()
        };
        assert_eq!(path_state_ray_visibility(&path), PathRayFlag::TRANSMIT.bits());
        path.flag = PathRayFlag::CAMERA | PathRayFlag::SHADOW_CATCHER_PASS;
        assert_eq!(
            path_state_ray_visibility(&path),
            PathRayFlag::CAMERA.bits() << SHADOW_CATCHER_VISIBILITY_SHIFT
        );
    }

    #[test]
    fn test_continuation_probability() {
        let kg = kernel_data(IntegratorConfig {
            min_bounce: 2,
            transparent_min_bounce: 1,
            ..Default::default()
        });
        let mut path = PathState {
            bounce: 2,
            throughput: Spectrum::zero(),
            ..Default::default()
        };
        assert_eq!(path_state_continuation_probability(&kg, &path, path.flag), 1.0);
        path.bounce = 3;
        assert_eq!(path_state_continuation_probability(&kg, &path, path.flag), 0.0);
        path.throughput = Spectrum::rgb(0.25, -0.04, 0.01);
        assert_almost_eq!(
            path_state_continuation_probability(&kg, &path, path.flag) as f64,
            0.5,
            1e-6
        );
        path.throughput = Spectrum::splat(4.0);
        assert_eq!(path_state_continuation_probability(&kg, &path, path.flag), 1.0);
        path.throughput = Spectrum::splat(0.01);
        path.transparent_bounce = 1;
        assert_eq!(
            path_state_continuation_probability(&kg, &path, PathRayFlag::TRANSPARENT),
            1.0
        );
    }

    #[test]
    fn test_ao_bounce() {
        let kg = kernel_data(IntegratorConfig::default());
        let path = PathState {
            bounce: 10,
            ..Default::default()
        };
        assert!(!path_state_ao_bounce(&kg, &path));
        let kg = kernel_data(IntegratorConfig {
            ao_bounces: 2,
            ..Default::default()
        });
        let mut path = PathState {
            bounce: 1,
            ..Default::default()
        };
        assert!(!path_state_ao_bounce(&kg, &path));
        path.bounce = 2;
        assert!(path_state_ao_bounce(&kg, &path));
        path.glossy_bounce = 1;
        assert!(!path_state_ao_bounce(&kg, &path));
    }

    #[test]
    fn test_volume_next() {
        let mut path = PathState {
            rng_offset: dim::BOUNCE_NUM,
            ..Default::default()
        };
        assert!(path_state_volume_next(&mut path));
        assert_eq!(path.rng_offset, dim::BOUNCE_NUM);
        assert!(path_state_volume_next(&mut path));
        assert_eq!(path.rng_offset, 2 * dim::BOUNCE_NUM);
        path.volume_bounds_bounce = VOLUME_BOUNDS_MAX;
        assert!(!path_state_volume_next(&mut path));
    }

    #[test]
    fn test_light_sample_terminate() {
        let kg = kernel_data(IntegratorConfig::default());
        let mut eval = BsdfEval::new(Label::DIFFUSE, Spectrum::splat(0.001));
        assert!(!light_sample_terminate(&kg, &mut eval, 0.99));
        assert_eq!(eval.sum, Spectrum::splat(0.001));

        let kg = kernel_data(IntegratorConfig {
            light_inv_rr_threshold: 100.0,
            ..Default::default()
        });
        let mut eval = BsdfEval::new(Label::DIFFUSE, Spectrum::splat(0.005));
        assert!(light_sample_terminate(&kg, &mut eval, 0.6));
        assert!(!light_sample_terminate(&kg, &mut eval, 0.2));
        assert_almost_eq!(eval.sum[0] as f64, 0.01, 1e-6);
    }

    #[test]
    fn test_bounce_dimensions_disjoint() {
        let kg = kernel_data(IntegratorConfig::default());
        let mut state = fresh_state(&kg);
        let mut used = std::collections::HashSet::new();
        for _ in 0..8 {
            let rng = state.path.rng_state();
            for d in [dim::TERMINATE, dim::LIGHT, dim::SURFACE_BSDF, dim::VOLUME_SHADE_OFFSET] {
                assert!(used.insert(rng.rng_offset + d));
            }
            path_state_next(&kg, &mut state, Label::REFLECT | Label::DIFFUSE, ShaderFlags::empty());
        }
    }
}
