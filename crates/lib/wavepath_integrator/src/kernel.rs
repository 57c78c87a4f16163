use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKernel {
    IntersectClosest,
    IntersectShadow,
    IntersectVolumeStack,
    ShadeBackground,
    ShadeLight,
    ShadeSurface,
    ShadeSurfaceRaytrace,
    ShadeSurfaceMnee,
    ShadeVolume,
    ShadeVolumeRayMarching,
    ShadeShadow,
}

impl DeviceKernel {
    pub const ALL: [DeviceKernel; 11] = [
        DeviceKernel::IntersectClosest,
        DeviceKernel::IntersectShadow,
        DeviceKernel::IntersectVolumeStack,
        DeviceKernel::ShadeBackground,
        DeviceKernel::ShadeLight,
        DeviceKernel::ShadeSurface,
        DeviceKernel::ShadeSurfaceRaytrace,
        DeviceKernel::ShadeSurfaceMnee,
        DeviceKernel::ShadeVolume,
        DeviceKernel::ShadeVolumeRayMarching,
        DeviceKernel::ShadeShadow,
    ];
    /// Kernels that operate on shadow paths rather than main paths.
    pub fn is_shadow(&self) -> bool {
        matches!(self, DeviceKernel::IntersectShadow | DeviceKernel::ShadeShadow)
    }
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Everything a kernel reads besides its own path state.
pub struct KernelGlobals<'a, S: SceneServices> {
    pub data: &'a KernelData,
    pub scene: &'a S,
    pub render_buffer: &'a RenderBuffer,
    pub paths: &'a StateArena<IntegratorState>,
    pub shadows: &'a StateArena<ShadowPathState>,
}

impl<'a, S: SceneServices> KernelGlobals<'a, S> {
    /// Queues a shadow path. Returns false when the shadow arena is full and the sample is lost.
    pub fn spawn_shadow_path(&self, shadow: ShadowPathState) -> bool {
        debug_assert!(shadow.queued_kernel.map_or(false, |k| k.is_shadow()));
        match self.shadows.alloc(shadow) {
            Some(_) => true,
            None => {
                log::warn!("shadow path arena exhausted, dropping a light sample");
                false
            }
        }
    }
    pub fn spawn_path(&self, state: IntegratorState) -> Option<StateHandle> {
        let handle = self.paths.alloc(state);
        if handle.is_none() {
            log::warn!("path arena exhausted, dropping a split path");
        }
        handle
    }
}

/// Runs the kernel a main path is queued for.
pub fn run_path_kernel<S: SceneServices>(
    kg: &KernelGlobals<S>,
    kernel: DeviceKernel,
    state: &mut IntegratorState,
) {
    debug_assert_eq!(state.path.queued_kernel, Some(kernel));
    match kernel {
        DeviceKernel::IntersectClosest => intersect_closest::integrator_intersect_closest(kg, state),
        DeviceKernel::IntersectVolumeStack => {
            intersect_volume_stack::integrator_intersect_volume_stack(kg, state)
        }
        DeviceKernel::ShadeBackground => shade_background::integrator_shade_background(kg, state),
        DeviceKernel::ShadeLight => shade_light::integrator_shade_light(kg, state),
        DeviceKernel::ShadeSurface
        | DeviceKernel::ShadeSurfaceRaytrace
        | DeviceKernel::ShadeSurfaceMnee => {
            shade_surface::integrator_shade_surface(kg, state, kernel)
        }
        DeviceKernel::ShadeVolume => shade_volume::integrator_shade_volume(kg, state, false),
        DeviceKernel::ShadeVolumeRayMarching => {
            shade_volume::integrator_shade_volume(kg, state, true)
        }
        DeviceKernel::IntersectShadow | DeviceKernel::ShadeShadow => {
            unreachable!("{:?} runs on shadow paths", kernel)
        }
    }
}

pub fn run_shadow_kernel<S: SceneServices>(
    kg: &KernelGlobals<S>,
    kernel: DeviceKernel,
    state: &mut ShadowPathState,
) {
    debug_assert_eq!(state.queued_kernel, Some(kernel));
    match kernel {
        DeviceKernel::IntersectShadow => intersect_shadow::integrator_intersect_shadow(kg, state),
        DeviceKernel::ShadeShadow => shade_shadow::integrator_shade_shadow(kg, state),
        _ => unreachable!("{:?} runs on main paths", kernel),
    }
}
