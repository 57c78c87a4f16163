use crate::*;

/// Visibility mask for a shadow ray, shifted for shadow catcher pass rays.
pub fn integrator_shadow_visibility(flag: PathRayFlag) -> u32 {
    let visibility = PathRayFlag::SHADOW.bits();
    if flag.contains(PathRayFlag::SHADOW_CATCHER_PASS) {
        visibility << SHADOW_CATCHER_VISIBILITY_SHIFT
    } else {
        visibility
    }
}

pub fn integrator_intersect_shadow<S: SceneServices>(kg: &KernelGlobals<S>, shadow: &mut ShadowPathState) {
    let visibility = integrator_shadow_visibility(shadow.flag);
    if kg.scene.intersect_shadow(&shadow.ray, visibility) {
        shadow.terminate();
        return;
    }
    shadow.queued_kernel = Some(DeviceKernel::ShadeShadow);
}
