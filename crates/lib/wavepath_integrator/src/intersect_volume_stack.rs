//! Seeds the volume stack of a path whose origin may lie inside volumes.
use crate::*;

pub fn integrator_intersect_volume_stack<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    let path_flag = state.path.flag;
    let mut visibility = PathRayFlag::ALL_VISIBILITY.bits();
    if path_flag.contains(PathRayFlag::SHADOW_CATCHER_PASS) {
        visibility <<= SHADOW_CATCHER_VISIBILITY_SHIFT;
    }

    let ray = Ray {
        time: state.ray.time,
        ..Ray::new(state.ray.o, state.ray.d)
    };
    let mut stack = kg.scene.volume_stack_init(&ray, visibility);
    if stack.len() > VOLUME_STACK_SIZE - 1 {
        log::debug!(
            "{} volumes enclose the ray origin, keeping {}",
            stack.len(),
            VOLUME_STACK_SIZE - 1
        );
        stack.truncate(VOLUME_STACK_SIZE - 1);
    }
    state.volume_stack = stack;

    if path_flag.contains(PathRayFlag::SHADOW_CATCHER_PASS) {
        // the catcher clone resumes shading the catcher it was split at
        let isect = state.isect;
        let shader = kg.scene.intersection_shader(&isect);
        let kernel = intersect_closest::integrator_surface_kernel(
            kg.data,
            kg.scene.shader_flags(shader),
            kg.scene.object_flags(isect.object),
        );
        state.next_kernel_sorted(kernel, shader);
    } else {
        state.next_kernel(DeviceKernel::IntersectClosest);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_camera_inside_volume() {
        let mut scene = MockScene::new();
        for i in 0..40 {
            scene.initial_volume_stack.push(VolumeStackEntry { object: i, shader: i });
        }
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = harness.camera_state(&kg);
        state.next_kernel(DeviceKernel::IntersectVolumeStack);
        integrator_intersect_volume_stack(&kg, &mut state);
        assert_eq!(state.volume_stack.len(), VOLUME_STACK_SIZE - 1);
        assert_eq!(state.volume_stack[0], VolumeStackEntry { object: 0, shader: 0 });
        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::IntersectClosest));
    }

    #[test]
    fn test_catcher_clone_resumes_surface() {
        let mut scene = MockScene::new();
        scene.initial_volume_stack.push(VolumeStackEntry { object: 2, shader: 9 });
        scene.shader_flags.insert(3, ShaderFlags::HAS_RAYTRACE);
        let harness = Harness::new(IntegratorConfig::default(), 1, 1);
        let kg = harness.globals(&scene);
        let mut state = harness.camera_state(&kg);
        state.path.flag |= PathRayFlag::SHADOW_CATCHER_HIT | PathRayFlag::SHADOW_CATCHER_PASS;
        state.isect = surface_hit(4.0, 3);
        integrator_intersect_volume_stack(&kg, &mut state);
        assert_eq!(state.volume_stack.len(), 1);
        assert_eq!(state.path.queued_kernel, Some(DeviceKernel::ShadeSurfaceRaytrace));
        assert_eq!(state.path.shader_sort_key, 3);
    }
}
