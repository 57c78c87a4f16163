//! Emission of lamps hit by BSDF rays.
use crate::light_passes::*;
use crate::*;

/// MIS weight of emission found by a BSDF ray, against light sampling of the same emitter.
///
/// With light MIS disabled, emitters that light sampling covers are left entirely to it.
pub fn light_sample_mis_weight_forward(kg: &KernelData, path: &PathState, use_mis: bool, light_pdf: f32) -> f32 {
    if path.flag.contains(PathRayFlag::MIS_SKIP) || !use_mis {
        return 1.0;
    }
    if !kg.integrator.use_light_mis {
        return 0.0;
    }
    power_heuristic(path.mis_ray_pdf, light_pdf)
}

/// MIS weight of a light sample against BSDF sampling toward it.
pub fn light_sample_mis_weight_nee(kg: &KernelData, ls: &LightSample, bsdf_pdf: f32) -> f32 {
    if kg.integrator.use_light_mis && ls.shader_flags.contains(ShaderFlags::USE_MIS) {
        power_heuristic(ls.pdf, bsdf_pdf)
    } else {
        1.0
    }
}

/// Caustic lamps reached through a refractive caster from a receiver are left to manifold
/// sampling.
pub fn light_culled_by_mnee(path: &PathState, use_caustics: bool) -> bool {
    use_caustics && path.mnee.contains(MneeFlag::CULL_LIGHT_CONNECTION)
}

/// Next representable distance after `t`, so the same lamp is not hit again.
fn intersection_t_offset(t: f32) -> f32 {
    if t.is_finite() && t >= 0.0 {
        f32::from_bits(t.to_bits() + 1)
    } else {
        t
    }
}

fn integrate_light<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    let isect = state.isect;
    let ray = state.ray;
    state.ray.tmin = intersection_t_offset(isect.t);

    let path_flag = state.path.flag;
    let Some(emission) = kg.scene.eval_light_emission(&ray, &isect, path_flag.bits()) else {
        return;
    };
    if emission.eval.is_zero() || light_culled_by_mnee(&state.path, emission.use_caustics) {
        return;
    }
    let mis_weight = light_sample_mis_weight_forward(kg.data, &state.path, emission.use_mis, emission.light_pdf);
    film_write_surface_emission(
        kg.data,
        kg.render_buffer,
        &state.path,
        emission.eval,
        mis_weight,
        emission.group,
    );
}

pub fn integrator_shade_light<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    integrate_light(kg, state);

    // lamps are treated as transparent so precision issues cannot hit the same lamp forever
    state.path.transparent_bounce += 1;
    if state.path.transparent_bounce >= kg.data.integrator.transparent_max_bounce {
        state.terminate();
        return;
    }
    state.next_kernel(DeviceKernel::IntersectClosest);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::*;
    use wavepath_common::statrs::assert_almost_eq;

    fn lamp_state(harness: &Harness, kg: &KernelGlobals<MockScene>) -> IntegratorState {
        let mut state = harness.camera_state(kg);
        state.isect = lamp_hit(2.0);
        state.next_kernel(DeviceKernel::ShadeLight);
        state
    }

    #[test]
    fn test_camera_sees_lamp() {
        let mut scene = MockScene::new();
        scene.lamp_emission = Some(lamp_emission(Spectrum::splat(3.0), 0.5));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = lamp_state(&harness, &kg);
        integrator_shade_light(&kg, &mut state);
        assert_eq!(harness.buffer.load3(0, kg.data.film.combined), Rgb::splat(3.0));
        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
        assert_eq!(state.path.transparent_bounce, 1);
        assert!(state.ray.tmin > 2.0);
    }

    #[test]
    fn test_mis_after_bounce() {
        let mut scene = MockScene::new();
        scene.lamp_emission = Some(lamp_emission(Spectrum::splat(1.0), 1.0));
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = lamp_state(&harness, &kg);
        state.path.flag = PathRayFlag::REFLECT | PathRayFlag::DIFFUSE;
        state.path.bounce = 1;
        state.path.mis_ray_pdf = 1.0;
        integrator_shade_light(&kg, &mut state);
        let combined = harness.buffer.load3(0, kg.data.film.combined);
        assert_almost_eq!(combined[0] as f64, 0.5, 1e-6);
    }

    #[test]
    fn test_transparent_bounce_limit() {
        let scene = MockScene::new();
        let harness = Harness::new(
            IntegratorConfig {
                transparent_max_bounce: 1,
                ..Default::default()
            },
            1,
            1,
        );
        let kg = harness.globals(&scene);
        let mut state = lamp_state(&harness, &kg);
        integrator_shade_light(&kg, &mut state);
        assert!(state.is_terminated());
    }

    #[test]
    fn test_mnee_culled_lamp() {
        let mut scene = MockScene::new();
        scene.lamp_emission = Some(EmissionEval {
            use_caustics: true,
            ..lamp_emission(Spectrum::splat(1.0), 1.0)
        });
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = lamp_state(&harness, &kg);
        state.path.mnee = MneeFlag::CULL_LIGHT_CONNECTION;
        integrator_shade_light(&kg, &mut state);
        assert_eq!(harness.buffer.load3(0, kg.data.film.combined), Rgb::splat(0.0));
    }

    #[test]
    fn test_forward_weight_without_light_mis() {
        let data = KernelData::new(&IntegratorConfig {
            use_light_mis: false,
            ..Default::default()
        })
        .unwrap();
        let mut path = PathState::default();
        assert_eq!(light_sample_mis_weight_forward(&data, &path, true, 1.0), 0.0);
        assert_eq!(light_sample_mis_weight_forward(&data, &path, false, 1.0), 1.0);
        path.flag = PathRayFlag::MIS_SKIP;
        assert_eq!(light_sample_mis_weight_forward(&data, &path, true, 1.0), 1.0);
    }
}
