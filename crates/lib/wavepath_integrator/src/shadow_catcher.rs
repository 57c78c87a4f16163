//! Shadow catcher path splitting.
//!
//! At the first camera-visible hit of a catcher object a path is duplicated. The original
//! keeps shading the catcher as a regular object (the matte side), the clone renders the
//! scene as if the catcher was only receiving shadows and writes to the catcher pass.
use crate::*;

pub fn kernel_shadow_catcher_is_path_split_bounce(
    kg: &KernelData,
    path_flag: PathRayFlag,
    object_flags: ObjectFlags,
) -> bool {
    if !kg.has(KernelFeatures::SHADOW_CATCHER) {
        return false;
    }
    if !object_flags.contains(ObjectFlags::SHADOW_CATCHER) || object_flags.contains(ObjectFlags::HOLDOUT_MASK) {
        return false;
    }
    // later bounces see the catcher as a regular object
    if !path_flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND) {
        return false;
    }
    !path_flag.contains(PathRayFlag::SHADOW_CATCHER_HIT)
}

/// Splits the path if it hit a catcher. The clone is queued on its own and its handle is
/// returned. `surface_kernel` is the kernel the original path continues with.
pub fn integrator_split_shadow_catcher<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    object_flags: ObjectFlags,
    surface_kernel: DeviceKernel,
) -> Option<StateHandle> {
    if !kernel_shadow_catcher_is_path_split_bounce(kg.data, state.path.flag, object_flags) {
        return None;
    }
    light_passes::film_write_shadow_catcher_bounce_data(kg.data, kg.render_buffer, &state.path);
    state.path.flag |= PathRayFlag::SHADOW_CATCHER_HIT;

    let mut clone = state.clone();
    clone.path.flag |= PathRayFlag::SHADOW_CATCHER_PASS;
    clone.guiding = None;

    let shader = kg.scene.intersection_shader(&clone.isect);
    if kg.data.film.is_active(PassType::Background) && !kg.data.integrator.background_transparent {
        clone.path.flag |= PathRayFlag::SHADOW_CATCHER_BACKGROUND;
        clone.next_kernel(DeviceKernel::ShadeBackground);
    } else if !clone.volume_stack.is_empty() {
        // the catcher pass sees a different set of objects, rebuild its stack
        clone.next_kernel(DeviceKernel::IntersectVolumeStack);
    } else {
        clone.next_kernel_sorted(surface_kernel, shader);
    }
    kg.spawn_path(clone)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::*;

    fn catcher_config() -> IntegratorConfig {
        IntegratorConfig {
            use_shadow_catcher: true,
            passes: vec![PassType::ShadowCatcher],
            ..Default::default()
        }
    }

    #[test]
    fn test_split_bounce_predicate() {
        let kg = KernelData::new(&catcher_config()).unwrap();
        let primary = PathRayFlag::CAMERA | PathRayFlag::TRANSPARENT_BACKGROUND;
        assert!(kernel_shadow_catcher_is_path_split_bounce(&kg, primary, ObjectFlags::SHADOW_CATCHER));
        assert!(!kernel_shadow_catcher_is_path_split_bounce(&kg, primary, ObjectFlags::empty()));
        assert!(!kernel_shadow_catcher_is_path_split_bounce(
            &kg,
            primary,
            ObjectFlags::SHADOW_CATCHER | ObjectFlags::HOLDOUT_MASK
        ));
        assert!(!kernel_shadow_catcher_is_path_split_bounce(
            &kg,
            PathRayFlag::REFLECT,
            ObjectFlags::SHADOW_CATCHER
        ));
        assert!(!kernel_shadow_catcher_is_path_split_bounce(
            &kg,
            primary | PathRayFlag::SHADOW_CATCHER_HIT,
            ObjectFlags::SHADOW_CATCHER
        ));
        let kg = KernelData::new(&IntegratorConfig::default()).unwrap();
        assert!(!kernel_shadow_catcher_is_path_split_bounce(&kg, primary, ObjectFlags::SHADOW_CATCHER));
    }

    #[test]
    fn test_split_once_per_lineage() {
        let scene = MockScene::new();
        let harness = Harness::new(catcher_config(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = harness.camera_state(&kg);
        state.path.throughput = Spectrum::splat(0.5);

        let clone = integrator_split_shadow_catcher(&kg, &mut state, ObjectFlags::SHADOW_CATCHER, DeviceKernel::ShadeSurface);
        let clone = clone.expect("first catcher hit splits");
        assert!(state.path.flag.contains(PathRayFlag::SHADOW_CATCHER_HIT));
        assert!(!state.path.flag.contains(PathRayFlag::SHADOW_CATCHER_PASS));
        let cloned = kg.paths.get_cloned(clone).unwrap();
        assert!(cloned
            .path
            .flag
            .contains(PathRayFlag::SHADOW_CATCHER_HIT | PathRayFlag::SHADOW_CATCHER_PASS));
        assert_eq!(cloned.path.queued_kernel, Some(DeviceKernel::ShadeSurface));
        assert_eq!(cloned.path.render_pixel_index, state.path.render_pixel_index);

        // neither side splits again
        let mut cloned = cloned;
        assert!(integrator_split_shadow_catcher(&kg, &mut state, ObjectFlags::SHADOW_CATCHER, DeviceKernel::ShadeSurface).is_none());
        assert!(integrator_split_shadow_catcher(&kg, &mut cloned, ObjectFlags::SHADOW_CATCHER, DeviceKernel::ShadeSurface).is_none());
        assert_eq!(kg.paths.num_live(), 1);

        let buffer = kg.render_buffer;
        assert_eq!(buffer.load(0, kg.data.film.shadow_catcher_sample_count), 1.0);
        assert_eq!(buffer.load(0, kg.data.film.shadow_catcher_matte + 3), 0.5);
    }

    #[test]
    fn test_split_routing() {
        let scene = MockScene::new();
        let harness = Harness::new(
            IntegratorConfig {
                passes: vec![PassType::ShadowCatcher, PassType::Background],
                ..catcher_config()
            },
            1,
            1,
        );
        let kg = harness.globals(&scene);
        let mut state = harness.camera_state(&kg);
        let clone = integrator_split_shadow_catcher(&kg, &mut state, ObjectFlags::SHADOW_CATCHER, DeviceKernel::ShadeSurface)
            .unwrap();
        let cloned = kg.paths.get_cloned(clone).unwrap();
        assert_eq!(cloned.path.queued_kernel, Some(DeviceKernel::ShadeBackground));
        assert!(cloned.path.flag.contains(PathRayFlag::SHADOW_CATCHER_BACKGROUND));

        let harness = Harness::new(catcher_config(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = harness.camera_state(&kg);
        state.volume_stack.push(VolumeStackEntry { object: 0, shader: 0 });
        let clone = integrator_split_shadow_catcher(&kg, &mut state, ObjectFlags::SHADOW_CATCHER, DeviceKernel::ShadeSurface)
            .unwrap();
        let cloned = kg.paths.get_cloned(clone).unwrap();
        assert_eq!(cloned.path.queued_kernel, Some(DeviceKernel::IntersectVolumeStack));
    }
}
