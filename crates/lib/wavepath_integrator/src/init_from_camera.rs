use crate::light_passes::film_write_sample;
use crate::path_state::*;
use crate::*;

/// Returns false if the pixel converged under adaptive sampling and takes no more samples.
pub fn film_need_sample_pixel(kg: &KernelData, buffer: &RenderBuffer, pixel: u32) -> bool {
    let aux = kg.film.adaptive_aux_buffer;
    if aux == PASS_UNUSED {
        return true;
    }
    buffer.load(pixel, aux + 3) == 0.0
}

/// Seeds a camera path for pixel `(x, y)`. Returns false if the pixel was skipped; the state
/// is left terminated whenever no ray is launched.
pub fn integrator_init_from_camera<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    tile: &WorkTile,
    x: u32,
    y: u32,
    scheduled_sample: u32,
) -> bool {
    path_state_init(state, tile, x, y);
    let pixel = state.path.render_pixel_index;
    if !film_need_sample_pixel(kg.data, kg.render_buffer, pixel) {
        return false;
    }

    // the sample counts even if the camera rejects the ray
    let sample = film_write_sample(kg.data, kg.render_buffer, pixel, scheduled_sample, tile.sample_offset);

    let sampling = &kg.data.sampling;
    let rng_hash = sampling.hash_pixel(x, y);
    let rand_filter = if sample == 0 {
        vec2(0.5, 0.5)
    } else {
        sampling.sample_2d(rng_hash, sample, dim::FILTER)
    };
    let rand_time_lens = if kg.scene.needs_lens_time() {
        sampling.sample_3d(rng_hash, sample, dim::LENS_TIME)
    } else {
        Vec3::ZERO
    };

    let ray = kg.scene.generate_ray(
        x,
        y,
        rand_filter,
        vec2(rand_time_lens.y, rand_time_lens.z),
        rand_time_lens.x,
    );
    if ray.tmax == 0.0 {
        return true;
    }

    path_state_init_integrator(kg.data, state, sample, rng_hash);
    state.ray = ray;

    if kg.scene.is_inside_volume() {
        state.next_kernel(DeviceKernel::IntersectVolumeStack);
    } else {
        state.next_kernel(DeviceKernel::IntersectClosest);
    }
    true
}
