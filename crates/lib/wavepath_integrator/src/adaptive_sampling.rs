//! Per-pixel stopping condition for adaptive sampling.
//!
//! The auxiliary pass accumulates twice the contribution of class A samples, which makes it an
//! estimate of the same pixel from half the samples. A pixel converges once the difference
//! between both estimates, relative to the square root of its brightness, falls below the
//! threshold. Converged pixels get a non-zero alpha in the auxiliary pass and are skipped by
//! the seeding kernels.
use crate::*;

/// Returns true if the pixel is converged. Pixels that already converged stay converged
/// unless `reset` is set.
pub fn adaptive_sampling_convergence_check(kg: &KernelData, buffer: &RenderBuffer, pixel: u32, threshold: f32, reset: bool) -> bool {
    let film = &kg.film;
    debug_assert!(film.adaptive_aux_buffer != PASS_UNUSED && film.sample_count != PASS_UNUSED);
    let aux_w = film.adaptive_aux_buffer + 3;
    if !reset && buffer.load(pixel, aux_w) != 0.0 {
        return true;
    }
    let num_samples = buffer.load_uint(pixel, film.sample_count);
    if num_samples == 0 {
        return false;
    }
    let inv_samples = 1.0 / num_samples as f32;
    let half = buffer.load3(pixel, film.adaptive_aux_buffer);
    let full = buffer.load3(pixel, film.combined);

    let error_difference = (full - half).abs().sum() * inv_samples;
    let error_normalize = (full.sum() * inv_samples).max(0.0).sqrt();
    // epsilon keeps black pixels from dividing by zero
    let error = error_difference / (1e-4 + error_normalize);
    let converged = error < threshold;
    buffer.store(pixel, aux_w, if converged { 1.0 } else { 0.0 });
    converged
}

fn is_converged(kg: &KernelData, buffer: &RenderBuffer, pixel: u32) -> bool {
    buffer.load(pixel, kg.film.adaptive_aux_buffer + 3) != 0.0
}

fn mark_unconverged(kg: &KernelData, buffer: &RenderBuffer, pixel: u32) {
    buffer.store(pixel, kg.film.adaptive_aux_buffer + 3, 0.0);
}

/// Dilates unconverged pixels by one along a row, so pixels next to noisy ones keep sampling.
pub fn adaptive_sampling_filter_x(kg: &KernelData, buffer: &RenderBuffer, tile: &WorkTile, y: u32) {
    let mut prev = false;
    for x in tile.x..tile.x + tile.w {
        let pixel = tile.render_pixel_index(x, y);
        if !is_converged(kg, buffer, pixel) {
            if x > tile.x && !prev {
                mark_unconverged(kg, buffer, pixel - 1);
            }
            prev = true;
        } else {
            if prev {
                mark_unconverged(kg, buffer, pixel);
            }
            prev = false;
        }
    }
}

/// Column counterpart of [`adaptive_sampling_filter_x`].
pub fn adaptive_sampling_filter_y(kg: &KernelData, buffer: &RenderBuffer, tile: &WorkTile, x: u32) {
    let mut prev = false;
    for y in tile.y..tile.y + tile.h {
        let pixel = tile.render_pixel_index(x, y);
        if !is_converged(kg, buffer, pixel) {
            if y > tile.y && !prev {
                mark_unconverged(kg, buffer, pixel - tile.stride);
            }
            prev = true;
        } else {
            if prev {
                mark_unconverged(kg, buffer, pixel);
            }
            prev = false;
        }
    }
}

/// Runs the convergence check over the tile and dilates the result. Returns the number of
/// pixels still sampling.
pub fn adaptive_sampling_update(kg: &KernelData, buffer: &RenderBuffer, tile: &WorkTile, reset: bool) -> usize {
    let threshold = kg.integrator.adaptive_threshold;
    let num_active: usize = (tile.y..tile.y + tile.h)
        .into_par_iter()
        .map(|y| {
            (tile.x..tile.x + tile.w)
                .filter(|&x| !adaptive_sampling_convergence_check(kg, buffer, tile.render_pixel_index(x, y), threshold, reset))
                .count()
        })
        .sum();
    if num_active == 0 {
        return 0;
    }
    (tile.y..tile.y + tile.h)
        .into_par_iter()
        .for_each(|y| adaptive_sampling_filter_x(kg, buffer, tile, y));
    (tile.x..tile.x + tile.w)
        .into_par_iter()
        .for_each(|x| adaptive_sampling_filter_y(kg, buffer, tile, x));
    (0..tile.h)
        .flat_map(|y| (0..tile.w).map(move |x| (x, y)))
        .filter(|&(x, y)| !is_converged(kg, buffer, tile.render_pixel_index(tile.x + x, tile.y + y)))
        .count()
}
