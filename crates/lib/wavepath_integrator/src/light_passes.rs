//! Render buffer writes. Every write is an atomic add into the pixel of the path, so kernels
//! can run in any order.
use crate::*;

/// Counts the sample for adaptive sampling and returns the sample index to use.
pub fn film_write_sample(kg: &KernelData, buffer: &RenderBuffer, pixel: u32, sample: u32, sample_offset: u32) -> u32 {
    if !kg.film.is_active(PassType::SampleCount) {
        return sample;
    }
    buffer.fetch_add_uint(pixel, kg.film.sample_count, 1) + sample_offset
}

/// Neutralizes non-finite values and limits the contribution by the configured clamp.
/// `bounce` is the number of bounces before the light was reached, 0 or less is direct.
pub fn film_clamp_light(kg: &KernelData, l: Spectrum, bounce: i32) -> Spectrum {
    let l = l.ensure_finite();
    let limit = if bounce > 0 {
        kg.integrator.sample_clamp_indirect
    } else {
        kg.integrator.sample_clamp_direct
    };
    if limit > 0.0 {
        let sum = l.abs().sum();
        if sum > limit {
            return l * (limit / sum);
        }
    }
    l
}

fn write_spectrum(buffer: &RenderBuffer, pixel: u32, offset: u32, v: Spectrum) {
    if offset != PASS_UNUSED {
        buffer.add3(pixel, offset, v.to_rgb());
    }
}

fn film_write_adaptive_buffer(kg: &KernelData, buffer: &RenderBuffer, pixel: u32, sample: u32, contribution: Spectrum) {
    let aux = kg.film.adaptive_aux_buffer;
    if aux == PASS_UNUSED {
        return;
    }
    if sample_is_class_a(kg.integrator.sampling_pattern, sample) {
        buffer.add4(pixel, aux, (contribution * 2.0).to_rgb(), 0.0);
    }
}

pub fn kernel_shadow_catcher_is_matte_path(path_flag: PathRayFlag) -> bool {
    !path_flag.contains(PathRayFlag::SHADOW_CATCHER_HIT)
}

pub fn kernel_shadow_catcher_is_object_pass(path_flag: PathRayFlag) -> bool {
    path_flag.contains(PathRayFlag::SHADOW_CATCHER_PASS)
}

/// Returns true when the contribution belongs to the catcher pass only.
fn film_write_shadow_catcher(
    kg: &KernelData,
    buffer: &RenderBuffer,
    pixel: u32,
    path_flag: PathRayFlag,
    contribution: Spectrum,
) -> bool {
    if !kg.has(KernelFeatures::SHADOW_CATCHER) {
        return false;
    }
    if kernel_shadow_catcher_is_matte_path(path_flag) {
        write_spectrum(buffer, pixel, kg.film.shadow_catcher_matte, contribution);
    }
    if kernel_shadow_catcher_is_object_pass(path_flag) {
        write_spectrum(buffer, pixel, kg.film.shadow_catcher, contribution);
        return true;
    }
    false
}

fn film_write_shadow_catcher_transparent(
    kg: &KernelData,
    buffer: &RenderBuffer,
    pixel: u32,
    path_flag: PathRayFlag,
    contribution: Spectrum,
    transparent: f32,
) -> bool {
    if !kg.has(KernelFeatures::SHADOW_CATCHER) {
        return false;
    }
    if kernel_shadow_catcher_is_matte_path(path_flag) {
        buffer.add4(pixel, kg.film.shadow_catcher_matte, contribution.to_rgb(), transparent);
    }
    if kernel_shadow_catcher_is_object_pass(path_flag) {
        write_spectrum(buffer, pixel, kg.film.shadow_catcher, contribution);
        return true;
    }
    false
}

pub fn film_write_combined_pass(
    kg: &KernelData,
    buffer: &RenderBuffer,
    pixel: u32,
    path_flag: PathRayFlag,
    sample: u32,
    contribution: Spectrum,
) {
    if film_write_shadow_catcher(kg, buffer, pixel, path_flag, contribution) {
        return;
    }
    write_spectrum(buffer, pixel, kg.film.combined, contribution);
    film_write_adaptive_buffer(kg, buffer, pixel, sample, contribution);
}

pub fn film_write_combined_transparent_pass(
    kg: &KernelData,
    buffer: &RenderBuffer,
    pixel: u32,
    path_flag: PathRayFlag,
    sample: u32,
    contribution: Spectrum,
    transparent: f32,
) {
    if film_write_shadow_catcher_transparent(kg, buffer, pixel, path_flag, contribution, transparent) {
        return;
    }
    if kg.film.combined != PASS_UNUSED {
        buffer.add4(pixel, kg.film.combined, contribution.to_rgb(), transparent);
    }
    film_write_adaptive_buffer(kg, buffer, pixel, sample, contribution);
}

fn lightgroup_offset(kg: &KernelData, lightgroup: Option<u32>) -> u32 {
    match lightgroup {
        Some(group) if kg.film.lightgroup != PASS_UNUSED && group < kg.film.num_lightgroups => {
            kg.film.lightgroup + 3 * group
        }
        _ => PASS_UNUSED,
    }
}

/// Splits a contribution into the light passes. `direct` selects the direct variants.
fn film_write_light_pass_split(
    kg: &KernelData,
    buffer: &RenderBuffer,
    pixel: u32,
    path_flag: PathRayFlag,
    direct: bool,
    diffuse_weight: Spectrum,
    glossy_weight: Spectrum,
    mut contribution: Spectrum,
) {
    let film = &kg.film;
    let mut pass_offset = PASS_UNUSED;
    if path_flag.intersects(PathRayFlag::SURFACE_PASS) {
        let glossy = if direct { film.glossy_direct } else { film.glossy_indirect };
        write_spectrum(buffer, pixel, glossy, glossy_weight * contribution);

        let transmission = if direct {
            film.transmission_direct
        } else {
            film.transmission_indirect
        };
        // transmission is whatever is neither diffuse nor glossy
        let transmission_weight = Spectrum::one() - diffuse_weight - glossy_weight;
        write_spectrum(buffer, pixel, transmission, transmission_weight * contribution);

        pass_offset = if direct { film.diffuse_direct } else { film.diffuse_indirect };
        contribution *= diffuse_weight;
    } else if path_flag.contains(PathRayFlag::VOLUME_PASS) {
        pass_offset = if direct { film.volume_direct } else { film.volume_indirect };
    }
    write_spectrum(buffer, pixel, pass_offset, contribution);
}

/// Writes light reached by a path, either to the directly visible `pass` or to the light
/// pass category the path picked at its first bounce.
pub fn film_write_emission_or_background_pass(
    kg: &KernelData,
    buffer: &RenderBuffer,
    path: &PathState,
    contribution: Spectrum,
    pass: u32,
    lightgroup: Option<u32>,
) {
    if !kg.has(KernelFeatures::PASSES) {
        return;
    }
    let pixel = path.render_pixel_index;
    let path_flag = path.flag;
    // catcher lineage light is only in the catcher pass
    if kernel_shadow_catcher_is_object_pass(path_flag) {
        return;
    }
    write_spectrum(buffer, pixel, lightgroup_offset(kg, lightgroup), contribution);
    if !path_flag.intersects(PathRayFlag::ANY_PASS) {
        write_spectrum(buffer, pixel, pass, contribution);
    } else if kg.has(KernelFeatures::LIGHT_PASSES) {
        film_write_light_pass_split(
            kg,
            buffer,
            pixel,
            path_flag,
            path.bounce == 1,
            path.pass_diffuse_weight,
            path.pass_glossy_weight,
            contribution,
        );
    }
}

pub fn film_write_surface_emission(
    kg: &KernelData,
    buffer: &RenderBuffer,
    path: &PathState,
    l: Spectrum,
    mis_weight: f32,
    lightgroup: Option<u32>,
) {
    let contribution = path.throughput * l * mis_weight;
    let contribution = film_clamp_light(kg, contribution, path.bounce as i32 - 1);
    film_write_combined_pass(kg, buffer, path.render_pixel_index, path.flag, path.sample, contribution);
    film_write_emission_or_background_pass(kg, buffer, path, contribution, kg.film.emission, lightgroup);
}

/// `l` already carries the path throughput.
pub fn film_write_volume_emission(
    kg: &KernelData,
    buffer: &RenderBuffer,
    path: &PathState,
    l: Spectrum,
    lightgroup: Option<u32>,
) {
    let contribution = film_clamp_light(kg, l, path.bounce as i32 - 1);
    film_write_combined_pass(kg, buffer, path.render_pixel_index, path.flag, path.sample, contribution);
    film_write_emission_or_background_pass(kg, buffer, path, contribution, kg.film.emission, lightgroup);
}

pub fn film_write_background(
    kg: &KernelData,
    buffer: &RenderBuffer,
    path: &PathState,
    l: Spectrum,
    transparent: f32,
    is_transparent_background_ray: bool,
    lightgroup: Option<u32>,
) {
    let contribution = film_clamp_light(kg, path.throughput * l, path.bounce as i32 - 1);
    let pixel = path.render_pixel_index;
    if is_transparent_background_ray {
        // seen directly through a transparent film, only the background pass gets the color
        if kg.film.background != PASS_UNUSED {
            write_spectrum(buffer, pixel, kg.film.background, path.denoising_feature_throughput * l);
        }
        film_write_combined_transparent_pass(
            kg,
            buffer,
            pixel,
            path.flag,
            path.sample,
            Spectrum::zero(),
            transparent,
        );
    } else {
        film_write_combined_transparent_pass(kg, buffer, pixel, path.flag, path.sample, contribution, transparent);
        film_write_emission_or_background_pass(kg, buffer, path, contribution, kg.film.background, lightgroup);
    }
}

/// Light or AO arriving through an unoccluded shadow path.
pub fn film_write_direct_light(kg: &KernelData, buffer: &RenderBuffer, shadow: &ShadowPathState) {
    let contribution = film_clamp_light(kg, shadow.throughput, shadow.bounce as i32);
    let path_flag = shadow.flag;
    let pixel = shadow.render_pixel_index;

    if path_flag.contains(PathRayFlag::SHADOW_FOR_AO) {
        if kg.has(KernelFeatures::AO_PASS) && path_flag.contains(PathRayFlag::CAMERA) {
            write_spectrum(buffer, pixel, kg.film.ao, contribution);
        }
        return;
    }

    film_write_combined_pass(kg, buffer, pixel, path_flag, shadow.sample, contribution);

    if !kg.has(KernelFeatures::PASSES) {
        return;
    }
    if !kernel_shadow_catcher_is_object_pass(path_flag) {
        let lightgroup = shadow.lightgroup.checked_sub(1);
        write_spectrum(buffer, pixel, lightgroup_offset(kg, lightgroup), contribution);
        if kg.has(KernelFeatures::LIGHT_PASSES) {
            film_write_light_pass_split(
                kg,
                buffer,
                pixel,
                path_flag,
                shadow.bounce == 0,
                shadow.pass_diffuse_weight,
                shadow.pass_glossy_weight,
                contribution,
            );
        }
    }
    if kg.film.shadow != PASS_UNUSED
        && path_flag.contains(PathRayFlag::SHADOW_FOR_LIGHT | PathRayFlag::TRANSPARENT_BACKGROUND)
    {
        let shadow_value = shadow.throughput.safe_divide(shadow.unshadowed_throughput, 0.0);
        write_spectrum(buffer, pixel, kg.film.shadow, shadow_value);
    }
}

pub fn film_write_holdout(kg: &KernelData, buffer: &RenderBuffer, path: &PathState, transparent: f32) {
    film_write_combined_transparent_pass(
        kg,
        buffer,
        path.render_pixel_index,
        path.flag,
        path.sample,
        Spectrum::zero(),
        transparent,
    );
}

/// Bookkeeping of the matte path at the moment the catcher path splits off.
pub fn film_write_shadow_catcher_bounce_data(kg: &KernelData, buffer: &RenderBuffer, path: &PathState) {
    debug_assert!(kg.film.shadow_catcher_sample_count != PASS_UNUSED);
    debug_assert!(kg.film.shadow_catcher_matte != PASS_UNUSED);
    let pixel = path.render_pixel_index;
    buffer.add(pixel, kg.film.shadow_catcher_sample_count, 1.0);
    // the rest of this path no longer reaches the matte, count it as transparency
    buffer.add(pixel, kg.film.shadow_catcher_matte + 3, path.throughput.average());
}

pub fn film_write_denoising_features_surface(kg: &KernelData, buffer: &RenderBuffer, path: &mut PathState, albedo: Spectrum) {
    if !path.flag.contains(PathRayFlag::DENOISING_FEATURES) {
        return;
    }
    write_spectrum(
        buffer,
        path.render_pixel_index,
        kg.film.denoising_albedo,
        path.denoising_feature_throughput * albedo,
    );
    path.flag.remove(PathRayFlag::DENOISING_FEATURES);
}

pub fn film_write_denoising_features_volume(
    kg: &KernelData,
    buffer: &RenderBuffer,
    path: &mut PathState,
    albedo: Spectrum,
    scatter: bool,
) {
    if !path.flag.contains(PathRayFlag::DENOISING_FEATURES) {
        return;
    }
    write_spectrum(
        buffer,
        path.render_pixel_index,
        kg.film.denoising_albedo,
        path.denoising_feature_throughput * albedo,
    );
    if scatter {
        path.flag.remove(PathRayFlag::DENOISING_FEATURES);
    }
}
