//! Closest-hit tracing and the decision of which kernel a path runs next.
use crate::path_state::*;
use crate::*;

/// With direct light filtered out of a bake, light sampling is skipped on the first bounce,
/// so lights must not be hit there either.
pub fn integrator_intersect_skip_lights(kg: &KernelData, path: &PathState) -> bool {
    kg.integrator.filter_direct_light && path.bounce == 1
}

/// Russian roulette and AO termination at an intersection. Returns true if the path ends
/// here without shading.
pub fn integrator_intersect_terminate(kg: &KernelData, state: &mut IntegratorState, shader_flags: ShaderFlags) -> bool {
    if path_state_ao_bounce(kg, &state.path) {
        if shader_flags.intersects(ShaderFlags::HAS_TRANSPARENT_SHADOW | ShaderFlags::HAS_EMISSION) {
            state.path.request_termination(Termination::TerminateAfterTransparent);
        } else if !state.volume_stack.is_empty() {
            state.path.request_termination(Termination::TerminateInNextVolume);
        } else {
            return true;
        }
    }

    let continuation_probability = if state.path.termination.is_immediate() {
        0.0
    } else {
        path_state_continuation_probability(kg, &state.path, state.path.flag)
    };
    state.path.continuation_probability = continuation_probability;
    if continuation_probability != 1.0 {
        let terminate = path_state_rng_1d(kg, &state.path.rng_state(), dim::TERMINATE);
        if continuation_probability == 0.0 || terminate >= continuation_probability {
            if shader_flags.contains(ShaderFlags::HAS_EMISSION) {
                // shade the emission of this surface, then stop
                state.path.request_termination(Termination::TerminateOnNextSurface);
            } else if !state.volume_stack.is_empty() {
                state.path.request_termination(Termination::TerminateInNextVolume);
            } else {
                return true;
            }
        }
    }

    // past the bounce limit only transparent or emissive surfaces still matter
    state.path.termination == Termination::TerminateAfterTransparent
        && state.volume_stack.is_empty()
        && !shader_flags.intersects(ShaderFlags::HAS_TRANSPARENT_SHADOW | ShaderFlags::HAS_EMISSION)
}

/// Surface kernel variant for a hit.
pub fn integrator_surface_kernel(kg: &KernelData, shader_flags: ShaderFlags, object_flags: ObjectFlags) -> DeviceKernel {
    let use_caustics = kg.integrator.use_caustics
        && object_flags.intersects(ObjectFlags::CAUSTICS_CASTER | ObjectFlags::CAUSTICS_RECEIVER);
    if use_caustics {
        DeviceKernel::ShadeSurfaceMnee
    } else if shader_flags.contains(ShaderFlags::HAS_RAYTRACE) {
        DeviceKernel::ShadeSurfaceRaytrace
    } else {
        DeviceKernel::ShadeSurface
    }
}

fn volume_kernel(kg: &KernelData) -> DeviceKernel {
    if kg.integrator.volume_ray_marching {
        DeviceKernel::ShadeVolumeRayMarching
    } else {
        DeviceKernel::ShadeVolume
    }
}

fn next_kernel_for_surface<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, shader_flags: ShaderFlags) {
    let isect = state.isect;
    let shader = kg.scene.intersection_shader(&isect);
    let object_flags = kg.scene.object_flags(isect.object);
    let kernel = integrator_surface_kernel(kg.data, shader_flags, object_flags);
    state.next_kernel_sorted(kernel, shader);
    shadow_catcher::integrator_split_shadow_catcher(kg, state, object_flags, kernel);
}

fn next_kernel_for_miss<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    if integrator_intersect_skip_lights(kg.data, &state.path) {
        state.terminate();
    } else {
        state.next_kernel(DeviceKernel::ShadeBackground);
    }
}

/// Picks the kernel for the persisted intersection `state.isect`.
pub fn integrator_intersect_next_kernel<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, hit: bool) {
    if !state.volume_stack.is_empty() {
        // inside a volume the segment up to the hit is integrated first, hit or not
        let hit_surface = hit && !state.isect.is_lamp();
        let flags = if hit_surface {
            kg.scene.shader_flags(kg.scene.intersection_shader(&state.isect))
        } else {
            ShaderFlags::empty()
        };
        if integrator_intersect_terminate(kg.data, state, flags) {
            state.terminate();
        } else {
            state.next_kernel(volume_kernel(kg.data));
        }
        return;
    }

    if !hit {
        next_kernel_for_miss(kg, state);
        return;
    }
    if state.isect.is_lamp() {
        state.next_kernel(DeviceKernel::ShadeLight);
        return;
    }
    let flags = kg.scene.shader_flags(kg.scene.intersection_shader(&state.isect));
    if integrator_intersect_terminate(kg.data, state, flags) {
        state.terminate();
        return;
    }
    next_kernel_for_surface(kg, state, flags);
}

/// Same as [`integrator_intersect_next_kernel`] for a volume segment that ended attenuated.
/// Termination was already decided before the volume.
pub fn integrator_intersect_next_kernel_after_volume<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    if !state.isect.is_hit() {
        next_kernel_for_miss(kg, state);
        return;
    }
    if state.isect.is_lamp() {
        state.next_kernel(DeviceKernel::ShadeLight);
        return;
    }
    let flags = kg.scene.shader_flags(kg.scene.intersection_shader(&state.isect));
    next_kernel_for_surface(kg, state, flags);
}

fn update_mnee_culling<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, last_object: ObjectId, hit: bool) {
    if !kg.data.integrator.use_caustics {
        return;
    }
    let path = &mut state.path;
    path.mnee.remove(MneeFlag::CULL_LIGHT_CONNECTION);
    if !hit {
        return;
    }
    let mut from_caster = false;
    let mut from_receiver = false;
    if !path.flag.contains(PathRayFlag::CAMERA) && last_object != OBJECT_NONE {
        let object_flags = kg.scene.object_flags(last_object);
        from_caster = object_flags.contains(ObjectFlags::CAUSTICS_CASTER);
        from_receiver = object_flags.contains(ObjectFlags::CAUSTICS_RECEIVER);
    }
    let had_receiver_ancestor = path.mnee.contains(MneeFlag::RECEIVER_ANCESTOR);
    path.mnee.remove(MneeFlag::RECEIVER_ANCESTOR);
    if from_caster && had_receiver_ancestor {
        path.mnee |= MneeFlag::CULL_LIGHT_CONNECTION;
    }
    if from_receiver {
        path.mnee |= MneeFlag::RECEIVER_ANCESTOR;
    }
}

pub fn integrator_intersect_closest<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    let ray = state.ray;
    let visibility = path_state_ray_visibility(&state.path);

    let mut isect = Intersection::none();
    let mut hit = false;
    if ray.tmax != 0.0 {
        if let Some(found) = kg.scene.intersect(&ray, visibility) {
            isect = found;
            hit = true;
        }
    }

    update_mnee_culling(kg, state, ray.self_object, hit);

    if kg.data.integrator.use_light_mis && !integrator_intersect_skip_lights(kg.data, &state.path) {
        let closest = if hit { Some(&isect) } else { None };
        if let Some(lamp) = kg.scene.intersect_lights(&ray, closest, state.path.flag.bits()) {
            isect = lamp;
            hit = true;
        }
    }

    state.isect = isect;
    integrator_intersect_next_kernel(kg, state, hit);
}
