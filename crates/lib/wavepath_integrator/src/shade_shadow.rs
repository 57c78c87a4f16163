//! Unoccluded shadow rays: attenuate through volumes and write the light contribution.
use crate::null_scattering::volume_shadow_null_scattering;
use crate::shade_volume::volume_shadow_ray_marching;
use crate::*;

pub fn integrator_shade_shadow<S: SceneServices>(kg: &KernelGlobals<S>, shadow: &mut ShadowPathState) {
    if !shadow.volume_stack.is_empty() {
        let ray = shadow.ray;
        let mut throughput = shadow.throughput;
        if kg.data.integrator.volume_ray_marching {
            volume_shadow_ray_marching(kg, shadow, &ray, &mut throughput);
        } else {
            volume_shadow_null_scattering(kg, shadow, &ray, &mut throughput);
        }
        if throughput.is_zero() {
            shadow.terminate();
            return;
        }
        shadow.throughput = throughput;
    }
    light_passes::film_write_direct_light(kg.data, kg.render_buffer, shadow);
    shadow.terminate();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::*;
    use wavepath_common::statrs::assert_almost_eq;

    fn shadow_path(tmax: f32) -> ShadowPathState {
        let mut ray = Ray::new(Vec3::ZERO, Vec3::Z);
        ray.tmax = tmax;
        let mut shadow = ShadowPathState::from_path(
            &PathState::default(),
            PathRayFlag::CAMERA | PathRayFlag::SHADOW_FOR_LIGHT | PathRayFlag::TRANSPARENT_BACKGROUND,
            Spectrum::splat(0.5),
            ray,
        );
        shadow.queued_kernel = Some(DeviceKernel::ShadeShadow);
        shadow
    }

    #[test]
    fn test_writes_direct_light() {
        let scene = MockScene::new();
        let harness = Harness::new(
            IntegratorConfig {
                passes: vec![PassType::Combined, PassType::Shadow],
                ..Default::default()
            },
            1,
            1,
        );
        let kg = harness.globals(&scene);
        let mut shadow = shadow_path(3.0);
        integrator_shade_shadow(&kg, &mut shadow);
        assert_eq!(shadow.queued_kernel, None);
        assert_eq!(harness.buffer.load3(0, kg.data.film.combined), Rgb::splat(0.5));
        assert_eq!(harness.buffer.load3(0, kg.data.film.shadow), Rgb::splat(1.0));
    }

    #[test]
    fn test_attenuated_by_volume() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME);
        scene.volumes.insert(
            1,
            VolumeShading {
                flag: ShaderFlags::EXTINCTION,
                coeff: VolumeShaderCoefficients {
                    sigma_t: Spectrum::splat(1.0),
                    ..Default::default()
                },
                phases: ShaderVolumePhases::new(),
            },
        );
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut shadow = shadow_path(2.0);
        shadow.volume_stack.push(VolumeStackEntry { object: 0, shader: 1 });
        integrator_shade_shadow(&kg, &mut shadow);
        let combined = harness.buffer.load3(0, kg.data.film.combined);
        assert_almost_eq!(combined[0] as f64, 0.5 * (-2.0f64).exp(), 1e-4);
    }

    #[test]
    fn test_heterogeneous_volume_methods_agree() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME | ShaderFlags::HETEROGENEOUS_VOLUME);
        scene.volumes.insert(1, absorber(0.75));
        scene.volume_step_size = 0.1;
        for volume_ray_marching in [false, true] {
            let harness = Harness::new(
                IntegratorConfig {
                    volume_ray_marching,
                    ..Default::default()
                },
                1,
                1,
            );
            let kg = harness.globals(&scene);
            let mut shadow = shadow_path(2.0);
            shadow.volume_stack.push(VolumeStackEntry { object: 0, shader: 1 });
            integrator_shade_shadow(&kg, &mut shadow);
            let combined = harness.buffer.load3(0, kg.data.film.combined);
            assert_almost_eq!(combined[1] as f64, 0.5 * (-1.5f64).exp(), 1e-4);
        }
    }

    #[test]
    fn test_blocked_by_dense_volume() {
        let mut scene = MockScene::new();
        scene.add_volume_shader(1, ShaderFlags::HAS_VOLUME);
        scene.volumes.insert(
            1,
            VolumeShading {
                flag: ShaderFlags::EXTINCTION,
                coeff: VolumeShaderCoefficients {
                    sigma_t: Spectrum::splat(1e4),
                    ..Default::default()
                },
                phases: ShaderVolumePhases::new(),
            },
        );
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut shadow = shadow_path(2.0);
        shadow.volume_stack.push(VolumeStackEntry { object: 0, shader: 1 });
        integrator_shade_shadow(&kg, &mut shadow);
        assert_eq!(shadow.queued_kernel, None);
        assert_eq!(harness.buffer.load3(0, kg.data.film.combined), Rgb::splat(0.0));
    }
}
