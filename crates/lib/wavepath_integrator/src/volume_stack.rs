use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeSampleMethod {
    None,
    Distance,
    Equiangular,
    Mis,
}

/// Updates the stack when a ray crosses a surface with a volume: entering through a front
/// face pushes the volume, leaving through a back face pops it.
pub fn volume_stack_enter_exit(stack: &mut VolumeStack, sd: &ShaderData) {
    if !sd.flag.contains(ShaderFlags::HAS_VOLUME) {
        return;
    }
    if sd.flag.contains(ShaderFlags::BACKFACING) {
        if let Some(i) = stack
            .iter()
            .position(|e| e.object == sd.object && e.shader == sd.shader)
        {
            stack.remove(i);
        }
    } else {
        let entry = VolumeStackEntry {
            object: sd.object,
            shader: sd.shader,
        };
        if stack.contains(&entry) {
            return;
        }
        if stack.len() < VOLUME_STACK_SIZE - 1 {
            stack.push(entry);
        } else {
            log::debug!("volume stack full, ignoring object {}", sd.object);
        }
    }
}

/// Keeps only the world volume, for rays leaving the scene through a non-closed mesh.
pub fn volume_stack_clean(stack: &mut VolumeStack) {
    stack.retain(|e| e.object == OBJECT_NONE);
}

/// Ray marching step size of the stack, `f32::MAX` when every volume is homogeneous.
pub fn volume_stack_step_size<S: SceneQuery + ?Sized>(kg: &KernelData, scene: &S, stack: &VolumeStack) -> f32 {
    let mut step_size = f32::MAX;
    for entry in stack.iter() {
        let flags = scene.shader_flags(entry.shader);
        if flags.contains(ShaderFlags::HETEROGENEOUS_VOLUME) {
            step_size = step_size.min(scene.object_volume_step_size(entry.object));
        }
    }
    if step_size != f32::MAX {
        step_size *= kg.integrator.volume_step_rate;
    }
    step_size
}

pub fn volume_stack_is_heterogeneous<S: SceneQuery + ?Sized>(scene: &S, stack: &VolumeStack) -> bool {
    stack
        .iter()
        .any(|e| scene.shader_flags(e.shader).contains(ShaderFlags::HETEROGENEOUS_VOLUME))
}

pub fn volume_stack_sample_method<S: SceneQuery + ?Sized>(scene: &S, stack: &VolumeStack) -> VolumeSampleMethod {
    let mut method = VolumeSampleMethod::None;
    for entry in stack.iter() {
        let flags = scene.shader_flags(entry.shader);
        if flags.contains(ShaderFlags::VOLUME_MIS) {
            return VolumeSampleMethod::Mis;
        }
        let entry_method = if flags.contains(ShaderFlags::VOLUME_EQUIANGULAR) {
            VolumeSampleMethod::Equiangular
        } else {
            VolumeSampleMethod::Distance
        };
        if method == VolumeSampleMethod::None {
            method = entry_method;
        } else if method != entry_method {
            return VolumeSampleMethod::Mis;
        }
    }
    method
}
