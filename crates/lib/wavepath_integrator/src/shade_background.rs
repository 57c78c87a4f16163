//! Rays leaving the scene: background and distant light emission.
use crate::intersect_closest::integrator_surface_kernel;
use crate::light_passes::*;
use crate::path_state::*;
use crate::shade_light::{light_culled_by_mnee, light_sample_mis_weight_forward};
use crate::*;

fn integrate_background<S: SceneServices>(kg: &KernelGlobals<S>, state: &IntegratorState) {
    let path = &state.path;
    let is_transparent_background_ray =
        kg.data.integrator.background_transparent && path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND);

    // a transparent background only needs the shader for the background pass
    let mut transparent = 0.0;
    let mut eval_background = true;
    if is_transparent_background_ray {
        transparent = path.throughput.average();
        eval_background = kg.data.film.is_active(PassType::Background);
    }

    let mut l = Spectrum::zero();
    let mut lightgroup = None;
    if eval_background {
        let emission = kg.scene.eval_background(&state.ray, path.flag.bits());
        if !light_culled_by_mnee(path, emission.use_caustics) {
            let mis_weight = light_sample_mis_weight_forward(kg.data, path, emission.use_mis, emission.light_pdf);
            l = emission.eval * mis_weight;
            lightgroup = emission.group;
        }
    }
    if path_state_ao_bounce(kg.data, path) {
        l *= kg.data.integrator.ao_bounces_factor;
    }

    film_write_background(
        kg.data,
        kg.render_buffer,
        path,
        l,
        transparent,
        is_transparent_background_ray,
        lightgroup,
    );
}

pub fn integrator_shade_background<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState) {
    integrate_background(kg, state);

    if state.path.flag.contains(PathRayFlag::SHADOW_CATCHER_BACKGROUND) {
        // the catcher pass was filled behind the catcher, now shade the catcher itself
        state.path.flag.remove(PathRayFlag::SHADOW_CATCHER_BACKGROUND);
        let isect = state.isect;
        let shader = kg.scene.intersection_shader(&isect);
        let kernel = integrator_surface_kernel(
            kg.data,
            kg.scene.shader_flags(shader),
            kg.scene.object_flags(isect.object),
        );
        state.next_kernel_sorted(kernel, shader);
        return;
    }
    state.terminate();
}
