//! Surface shading: holdout, emission, next event estimation, AO and the BSDF bounce.
use crate::light_passes::*;
use crate::path_state::*;
use crate::shade_light::{light_sample_mis_weight_forward, light_sample_mis_weight_nee};
use crate::volume_stack::*;
use crate::*;

fn integrate_surface_shader_setup<S: SceneServices>(kg: &KernelGlobals<S>, state: &IntegratorState) -> ShaderData {
    let mut sd = kg.scene.shader_setup_from_ray(&state.ray, &state.isect);
    sd.ray_length = state.isect.t;
    sd
}

/// Writes holdout transparency. Returns false if the surface is fully held out and the path
/// ends here.
fn integrate_surface_holdout<S: SceneServices>(kg: &KernelGlobals<S>, state: &IntegratorState, sd: &ShaderData) -> bool {
    let path = &state.path;
    let is_holdout = sd.flag.contains(ShaderFlags::HOLDOUT) || sd.object_flag.contains(ObjectFlags::HOLDOUT_MASK);
    if !is_holdout || !path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND) {
        return true;
    }
    let holdout_weight = if sd.object_flag.contains(ObjectFlags::HOLDOUT_MASK) {
        Spectrum::one()
    } else {
        sd.closure_holdout
    };
    let transparent = (holdout_weight * path.throughput).average();
    film_write_holdout(kg.data, kg.render_buffer, path, transparent);
    holdout_weight != Spectrum::one()
}

fn integrate_surface_emission<S: SceneServices>(kg: &KernelGlobals<S>, state: &IntegratorState, sd: &ShaderData) {
    let path = &state.path;
    let use_mis = sd.flag.contains(ShaderFlags::USE_MIS);
    let light_pdf = if use_mis && !path.flag.contains(PathRayFlag::MIS_SKIP) {
        kg.scene.emissive_surface_pdf(sd)
    } else {
        0.0
    };
    let mis_weight = light_sample_mis_weight_forward(kg.data, path, use_mis, light_pdf);
    film_write_surface_emission(
        kg.data,
        kg.render_buffer,
        path,
        sd.closure_emission_background,
        mis_weight,
        kg.scene.object_lightgroup(sd.object),
    );
}

/// Next event estimation: samples a light and queues a shadow ray toward it.
fn integrate_surface_direct_light<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &IntegratorState,
    sd: &ShaderData,
    closures: &S::Closures,
    use_mnee: bool,
) {
    let config = &kg.data.integrator;
    if !config.use_direct_light || !sd.flag.contains(ShaderFlags::BSDF_HAS_EVAL) {
        return;
    }
    let path = &state.path;
    if config.filter_direct_light && path.bounce == 0 {
        return;
    }
    let rng = path.rng_state();
    let rand_light = path_state_rng_3d(kg.data, &rng, dim::LIGHT);
    let Some(ls) = kg.scene.sample_light(rand_light, sd.time, sd.p, sd.n, sd.flag, path.bounce, path.flag.bits())
    else {
        return;
    };
    if ls.pdf <= 0.0 || ls.eval.is_zero() {
        return;
    }
    // an emissive triangle does not light itself
    if ls.prim != PRIM_NONE && ls.prim == sd.prim && ls.object == sd.object {
        return;
    }
    let is_transmission = ls.d.dot(sd.n) < 0.0;
    if use_mnee && ls.use_caustics && is_transmission && sd.object_flag.contains(ObjectFlags::CAUSTICS_CASTER) {
        return;
    }

    let (mut bsdf_eval, bsdf_pdf) = kg.scene.eval_bsdf(sd, closures, ls.d);
    bsdf_eval.mul(ls.eval / ls.pdf);
    bsdf_eval.mul_f(light_sample_mis_weight_nee(kg.data, &ls, bsdf_pdf));

    let terminate = path_state_rng_light_termination(kg.data, &rng);
    if light_sample_terminate(kg.data, &mut bsdf_eval, terminate) || bsdf_eval.is_zero() {
        return;
    }

    let ray = Ray {
        o: sd.p,
        d: ls.d,
        tmin: 0.0,
        tmax: ls.t,
        time: sd.time,
        differential: Differential::default(),
        self_object: sd.object,
        self_prim: sd.prim,
    };
    let mut flag = path.flag;
    // lamps and the background, emissive triangles have no shadow pass
    if ls.prim == PRIM_NONE {
        flag |= PathRayFlag::SHADOW_FOR_LIGHT;
    }
    let mut shadow = ShadowPathState::from_path(path, flag, path.throughput * bsdf_eval.sum, ray);
    if !flag.intersects(PathRayFlag::ANY_PASS) {
        shadow.flag |= if is_transmission {
            PathRayFlag::TRANSMISSION_PASS
        } else {
            PathRayFlag::REFLECT_PASS
        };
        if kg.data.has(KernelFeatures::LIGHT_PASSES) {
            shadow.pass_diffuse_weight = bsdf_eval.pass_diffuse_weight();
            shadow.pass_glossy_weight = bsdf_eval.pass_glossy_weight();
        }
    }
    shadow.lightgroup = ls.group.map_or(0, |g| g + 1);
    shadow.volume_stack = state.volume_stack.clone();
    if is_transmission {
        volume_stack_enter_exit(&mut shadow.volume_stack, sd);
    }
    kg.spawn_shadow_path(shadow);
}

/// Ambient occlusion pass: a cosine distributed shadow ray of limited length.
fn integrate_surface_ao<S: SceneServices>(kg: &KernelGlobals<S>, state: &IntegratorState, sd: &ShaderData) {
    let path = &state.path;
    if !kg.data.has(KernelFeatures::AO_PASS) || !path.flag.contains(PathRayFlag::CAMERA) {
        return;
    }
    let rand_ao = path_state_rng_2d(kg.data, &path.rng_state(), dim::SURFACE_AO);
    let (ao_d, ao_pdf) = sample_cos_hemisphere(sd.n, rand_ao);
    if ao_pdf <= 0.0 || ao_d.dot(sd.ng) <= 0.0 {
        return;
    }
    let ray = Ray {
        o: sd.p,
        d: ao_d,
        tmin: 0.0,
        tmax: kg.data.integrator.ao_bounces_distance,
        time: sd.time,
        differential: Differential::default(),
        self_object: sd.object,
        self_prim: sd.prim,
    };
    let alpha = (Spectrum::one() - sd.closure_transparent_extinction).map(|x| x.clamp(0.0, 1.0));
    let mut shadow = ShadowPathState::from_path(
        path,
        path.flag | PathRayFlag::SHADOW_FOR_AO,
        path.throughput * alpha,
        ray,
    );
    shadow.volume_stack = state.volume_stack.clone();
    kg.spawn_shadow_path(shadow);
}

/// Continues the path through the surface or along a sampled BSDF direction. Transparency
/// is picked stochastically against the BSDF. With `bsdf_allowed` false only transparency
/// may continue the path.
fn integrate_surface_bsdf_bounce<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    sd: &ShaderData,
    closures: &S::Closures,
    bsdf_allowed: bool,
) -> Option<Label> {
    let has_bsdf = bsdf_allowed && sd.flag.contains(ShaderFlags::BSDF);
    let transparency = if sd.flag.contains(ShaderFlags::TRANSPARENT) {
        sd.closure_transparent_extinction
    } else {
        Spectrum::zero()
    };
    let transparent_probability = if has_bsdf {
        transparency.average().clamp(0.0, 1.0)
    } else if transparency.is_black() {
        return None;
    } else {
        1.0
    };

    let mut rand_bsdf = path_state_rng_3d(kg.data, &state.path.rng_state(), dim::SURFACE_BSDF);
    if rand_bsdf.z < transparent_probability {
        let weight = transparency / transparent_probability;
        let ray = &mut state.ray;
        ray.o = sd.p;
        ray.tmin = 0.0;
        if ray.tmax != f32::MAX {
            ray.tmax -= sd.ray_length;
        }
        ray.self_object = sd.object;
        ray.self_prim = sd.prim;
        state.path.throughput *= weight;
        let label = Label::TRANSMIT | Label::TRANSPARENT;
        path_state_next(kg.data, state, label, sd.flag);
        return Some(label);
    }
    rand_bsdf.z = (rand_bsdf.z - transparent_probability) / (1.0 - transparent_probability);

    let sample = kg.scene.sample_bsdf(sd, closures, rand_bsdf)?;
    if sample.pdf == 0.0 || sample.eval.is_zero() {
        return None;
    }

    state.ray = Ray {
        o: sd.p,
        d: sample.wo.normalize(),
        tmin: 0.0,
        tmax: f32::MAX,
        time: sd.time,
        differential: state.ray.differential,
        self_object: sd.object,
        self_prim: sd.prim,
    };

    let path = &mut state.path;
    path.throughput *= sample.eval.sum / (sample.pdf * (1.0 - transparent_probability));
    if kg.data.has(KernelFeatures::LIGHT_PASSES) && path.bounce == 0 {
        path.pass_diffuse_weight = sample.eval.pass_diffuse_weight();
        path.pass_glossy_weight = sample.eval.pass_glossy_weight();
    }
    if !sample.label.contains(Label::TRANSPARENT) {
        path.mis_ray_pdf = sample.pdf;
        path.min_ray_pdf = path.min_ray_pdf.min(sample.pdf);
    }
    path_state_next(kg.data, state, sample.label, sd.flag);
    Some(sample.label)
}

/// Passes through a surface that only bounds a volume.
fn integrate_surface_volume_only_bounce(state: &mut IntegratorState, sd: &ShaderData) -> Option<Label> {
    if !path_state_volume_next(&mut state.path) {
        return None;
    }
    let ray = &mut state.ray;
    ray.o = sd.p;
    ray.tmin = 0.0;
    // camera clipping still applies behind the boundary
    if ray.tmax != f32::MAX {
        ray.tmax -= sd.ray_length;
    }
    ray.self_object = sd.object;
    ray.self_prim = sd.prim;
    Some(Label::TRANSMIT | Label::TRANSPARENT)
}

/// Returns the label of the continuation, `None` if the path ends at this surface.
fn integrate_surface<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, use_mnee: bool) -> Option<Label> {
    let mut sd = integrate_surface_shader_setup(kg, state);

    let label = if !sd.flag.contains(ShaderFlags::HAS_ONLY_VOLUME) {
        let closures = kg.scene.eval_surface(&mut sd, state.path.flag.bits());

        if !integrate_surface_holdout(kg, state, &sd) {
            return None;
        }
        if sd.flag.contains(ShaderFlags::EMISSION) {
            integrate_surface_emission(kg, state, &sd);
        }

        // termination decided at the intersection
        if state.path.termination.is_immediate() {
            return None;
        }
        let probability = state.path.continuation_probability;
        if probability == 0.0 {
            return None;
        }
        if probability != 1.0 {
            state.path.throughput /= probability;
        }

        film_write_denoising_features_surface(kg.data, kg.render_buffer, &mut state.path, sd.albedo);

        let bsdf_allowed = state.path.termination != Termination::TerminateAfterTransparent;
        if bsdf_allowed {
            integrate_surface_direct_light(kg, state, &sd, &closures, use_mnee);
            integrate_surface_ao(kg, state, &sd);
        }
        integrate_surface_bsdf_bounce(kg, state, &sd, &closures, bsdf_allowed)
    } else {
        integrate_surface_volume_only_bounce(state, &sd)
    };

    if label.map_or(false, |l| l.contains(Label::TRANSMIT)) {
        volume_stack_enter_exit(&mut state.volume_stack, &sd);
    }
    label
}

pub fn integrator_shade_surface<S: SceneServices>(kg: &KernelGlobals<S>, state: &mut IntegratorState, kernel: DeviceKernel) {
    let use_mnee = kernel == DeviceKernel::ShadeSurfaceMnee && kg.data.has(KernelFeatures::MNEE);
    match integrate_surface(kg, state, use_mnee) {
        Some(_) => state.next_kernel(DeviceKernel::IntersectClosest),
        None => state.terminate(),
    }
}
