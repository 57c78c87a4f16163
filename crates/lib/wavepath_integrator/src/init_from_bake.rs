//! Seeding paths from texels of a bake target. Each texel stores the triangle and
//! barycentrics it covers in the bake primitive pass.
use crate::intersect_closest::integrator_surface_kernel;
use crate::light_passes::film_write_sample;
use crate::path_state::*;
use crate::*;
use wavepath_core::hash::hash_uint;

const BAKE_JITTER_ATTEMPTS: u32 = 10;

/// Keeps the bake ray direction this far above the smooth normal.
const SURFACE_NORMAL_OFFSET: f32 = 0.2;
const TRUE_NORMAL_EPSILON: f32 = 1e-5;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BakeDifferential {
    dudx: f32,
    dudy: f32,
    dvdx: f32,
    dvdy: f32,
}

fn inside_triangle(u: f32, v: f32) -> bool {
    u >= 0.0 && v >= 0.0 && u + v <= 1.0
}

/// Jitters the barycentrics within the texel footprint, retrying with rehashed random numbers
/// until the point lands on the triangle. Falls back to the texel center.
fn bake_jitter_uv(kg: &KernelData, rng_hash: u32, sample: u32, u: f32, v: f32, diff: BakeDifferential) -> (f32, f32) {
    if sample == 0 {
        return (u, v);
    }
    let mut hash = rng_hash;
    for _ in 0..BAKE_JITTER_ATTEMPTS {
        let offset = kg.sampling.sample_2d(hash, sample, dim::BAKE_JITTER) - vec2(0.5, 0.5);
        let ju = u + diff.dudx * offset.x + diff.dudy * offset.y;
        let jv = v + diff.dvdx * offset.x + diff.dvdy * offset.y;
        if inside_triangle(ju, jv) {
            return (ju, jv);
        }
        hash = hash_uint(hash);
    }
    (u, v)
}

/// Moves barycentrics sitting exactly on a vertex slightly toward the centroid.
fn bake_nudge_vertex_uv(u: f32, v: f32) -> (f32, f32) {
    let on_vertex = [(1.0, 0.0), (0.0, 1.0), (0.0, 0.0)].contains(&(u, v));
    if !on_vertex {
        return (u, v);
    }
    let centroid = 1.0f32 / 3.0;
    (lerp(u, centroid, 1e-4f32), lerp(v, centroid, 1e-4f32))
}

/// Direction from the shading point toward the camera, kept above the surface so faces turned
/// away from the camera still get usable shading.
fn bake_camera_direction(d: Vec3, n: Vec3, ng: Vec3) -> Vec3 {
    let mut d = d;
    let dn = d.dot(n);
    if dn <= SURFACE_NORMAL_OFFSET {
        d = (d - n * (dn - SURFACE_NORMAL_OFFSET)).normalize();
    }
    // on the back side blend toward the normal as dn goes from 0 to -1
    if dn <= 0.0 {
        d = d.lerp(n, -dn).normalize();
    }
    let dng = d.dot(ng);
    if dng <= TRUE_NORMAL_EPSILON {
        d = (d - ng * (dng - TRUE_NORMAL_EPSILON)).normalize();
    }
    d
}

/// Seeds a path for the texel at `(x, y)`. Returns false if the pixel converged and was
/// skipped; the state is left terminated whenever no path is launched.
pub fn integrator_init_from_bake<S: SceneServices>(
    kg: &KernelGlobals<S>,
    state: &mut IntegratorState,
    tile: &WorkTile,
    x: u32,
    y: u32,
    scheduled_sample: u32,
) -> bool {
    let Some(bake) = kg.data.integrator.bake else {
        debug_assert!(false, "bake seeding without a bake configuration");
        return false;
    };
    path_state_init(state, tile, x, y);
    let pixel = state.path.render_pixel_index;
    let buffer = kg.render_buffer;
    let film = &kg.data.film;
    if !init_from_camera::film_need_sample_pixel(kg.data, buffer, pixel) {
        return false;
    }
    let sample = film_write_sample(kg.data, buffer, pixel, scheduled_sample, tile.sample_offset);

    let seed = buffer.load_uint(pixel, film.bake_primitive);
    let prim = buffer.load_uint(pixel, film.bake_primitive + 1);
    if prim == PRIM_NONE {
        return true;
    }
    let prim = prim + bake.tri_offset;
    let diff = BakeDifferential {
        dudx: buffer.load(pixel, film.bake_differential),
        dudy: buffer.load(pixel, film.bake_differential + 1),
        dvdx: buffer.load(pixel, film.bake_differential + 2),
        dvdy: buffer.load(pixel, film.bake_differential + 3),
    };

    let rng_hash = kg.data.sampling.hash_bake_seed(seed);
    let (u, v) = bake_jitter_uv(
        kg.data,
        rng_hash,
        sample,
        buffer.load(pixel, film.bake_primitive + 2),
        buffer.load(pixel, film.bake_primitive + 3),
        diff,
    );
    let (u, v) = bake_nudge_vertex_uv(u, v);

    path_state_init_integrator(kg.data, state, sample, rng_hash);

    let object = bake.object_index;
    let (p, ng, shader) = kg.scene.triangle_point_normal(object, prim, u, v);

    if film.is_active(PassType::Background) {
        // environment bake: look from the origin through the point
        state.ray = Ray::new(Vec3::ZERO, p.normalize_or_zero());
        state.next_kernel(DeviceKernel::ShadeBackground);
        return true;
    }

    let n = kg.scene.triangle_smooth_normal(object, prim, u, v, ng);

    // position and normal do not depend on shading
    if film.is_active(PassType::Position) {
        buffer.add3(pixel, film.position, Rgb::new(p));
        return true;
    }
    if film.is_active(PassType::Normal) {
        buffer.add3(pixel, film.normal, Rgb::new(n));
        return true;
    }

    let d = if bake.use_camera {
        bake_camera_direction(kg.scene.direction_from_point(p), n, ng)
    } else {
        n
    };
    state.ray = Ray::new(p + d, -d);
    state.isect = Intersection {
        t: 1.0,
        u,
        v,
        object,
        prim,
        ty: PrimitiveType::Triangle,
    };

    let kernel = integrator_surface_kernel(kg.data, kg.scene.shader_flags(shader), kg.scene.object_flags(object));
    state.next_kernel_sorted(kernel, shader);
    true
}
