//! Read-only scene services consumed by the integrator kernels.
//!
//! Geometry, shader graphs and light sampling live behind these traits; the integrator only
//! decides what to call and what to do with the answers.
use crate::bsdf::*;
use crate::*;
use smallvec::SmallVec;

bitflags! {
    /// Static shader properties plus the closure flags produced by evaluation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShaderFlags: u32 {
        // runtime, set by evaluation
        const EMISSION = 1 << 0;
        const BSDF = 1 << 1;
        const BSDF_HAS_EVAL = 1 << 2;
        const BSDF_HAS_TRANSMISSION = 1 << 3;
        const HOLDOUT = 1 << 4;
        const EXTINCTION = 1 << 5;
        const SCATTER = 1 << 6;
        const TRANSPARENT = 1 << 7;
        const AO = 1 << 8;
        const BACKFACING = 1 << 9;
        const RAY_PORTAL = 1 << 10;

        // static
        const USE_MIS = 1 << 16;
        const HAS_TRANSPARENT_SHADOW = 1 << 17;
        const HAS_VOLUME = 1 << 18;
        const HAS_ONLY_VOLUME = 1 << 19;
        const HETEROGENEOUS_VOLUME = 1 << 20;
        const VOLUME_EQUIANGULAR = 1 << 21;
        const VOLUME_MIS = 1 << 22;
        const HAS_EMISSION = 1 << 23;
        const HAS_RAYTRACE = 1 << 24;
        const EXCLUDE_SCATTER = 1 << 25;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        const HOLDOUT_MASK = 1 << 0;
        const SHADOW_CATCHER = 1 << 1;
        const CAUSTICS_CASTER = 1 << 2;
        const CAUSTICS_RECEIVER = 1 << 3;
        const HAS_VOLUME = 1 << 4;
        const INTERSECTS_VOLUME = 1 << 5;
    }
}

/// Shading point state handed to and filled in by the shading service.
#[derive(Clone, Debug)]
pub struct ShaderData {
    pub p: Vec3,
    pub n: Vec3,
    pub ng: Vec3,
    /// Points back toward the ray origin.
    pub wi: Vec3,
    pub time: f32,
    pub ray_length: f32,
    pub u: f32,
    pub v: f32,
    pub object: ObjectId,
    pub prim: PrimId,
    pub shader: ShaderId,
    pub ty: PrimitiveType,
    pub flag: ShaderFlags,
    pub object_flag: ObjectFlags,
    pub closure_emission_background: Spectrum,
    pub closure_transparent_extinction: Spectrum,
    pub closure_holdout: Spectrum,
    /// Reflectance estimate for denoising features.
    pub albedo: Spectrum,
}

impl ShaderData {
    pub fn new(p: Vec3, wi: Vec3, time: f32) -> Self {
        Self {
            p,
            n: Vec3::ZERO,
            ng: Vec3::ZERO,
            wi,
            time,
            ray_length: 0.0,
            u: 0.0,
            v: 0.0,
            object: OBJECT_NONE,
            prim: PRIM_NONE,
            shader: 0,
            ty: PrimitiveType::Triangle,
            flag: ShaderFlags::empty(),
            object_flag: ObjectFlags::empty(),
            closure_emission_background: Spectrum::zero(),
            closure_transparent_extinction: Spectrum::zero(),
            closure_holdout: Spectrum::zero(),
            albedo: Spectrum::zero(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStackEntry {
    pub object: ObjectId,
    pub shader: ShaderId,
}

pub const VOLUME_STACK_SIZE: usize = 32;
pub type VolumeStack = SmallVec<[VolumeStackEntry; 4]>;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumeShaderCoefficients {
    pub sigma_t: Spectrum,
    pub sigma_s: Spectrum,
    pub emission: Spectrum,
}

/// Volume shader evaluation at a point.
#[derive(Clone, Debug, Default)]
pub struct VolumeShading {
    pub flag: ShaderFlags,
    pub coeff: VolumeShaderCoefficients,
    pub phases: ShaderVolumePhases,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightSample {
    /// Point on the light, or direction for distant lights.
    pub p: Vec3,
    pub d: Vec3,
    /// Distance to the light, `f32::MAX` for distant and background lights.
    pub t: f32,
    /// Emission scaled by the geometry factor, not yet divided by `pdf`.
    pub eval: Spectrum,
    pub pdf: f32,
    pub shader_flags: ShaderFlags,
    pub group: Option<u32>,
    pub object: ObjectId,
    pub prim: PrimId,
    /// Lamp is handled by manifold next event estimation through refractive casters.
    pub use_caustics: bool,
}

/// Emission seen by a ray that hit a lamp or escaped to the background.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissionEval {
    pub eval: Spectrum,
    /// Pdf of sampling the same point through light sampling.
    pub light_pdf: f32,
    pub use_mis: bool,
    pub group: Option<u32>,
    pub use_caustics: bool,
}

pub trait SceneQuery: Sync + Send {
    fn intersect(&self, ray: &Ray, visibility: u32) -> Option<Intersection>;
    /// Returns true if an opaque surface blocks the ray. Volume-only boundaries never block.
    fn intersect_shadow(&self, ray: &Ray, visibility: u32) -> bool;
    fn shader_flags(&self, shader: ShaderId) -> ShaderFlags;
    fn object_flags(&self, object: ObjectId) -> ObjectFlags;
    fn intersection_shader(&self, isect: &Intersection) -> ShaderId;
    fn shader_setup_from_ray(&self, ray: &Ray, isect: &Intersection) -> ShaderData;
    fn shader_setup_from_volume(&self, ray: &Ray, object: ObjectId) -> ShaderData {
        let mut sd = ShaderData::new(ray.o, -ray.d, ray.time);
        sd.object = object;
        sd.ty = PrimitiveType::VolumeBound;
        sd
    }
    /// Step size for ray marching a heterogeneous volume, `f32::MAX` when homogeneous.
    fn object_volume_step_size(&self, object: ObjectId) -> f32;
    fn object_lightgroup(&self, _object: ObjectId) -> Option<u32> {
        None
    }
    /// Returns `(P, Ng, shader)` on the given triangle.
    fn triangle_point_normal(&self, object: ObjectId, prim: PrimId, u: f32, v: f32) -> (Vec3, Vec3, ShaderId);
    fn triangle_smooth_normal(&self, object: ObjectId, prim: PrimId, u: f32, v: f32, ng: Vec3) -> Vec3 {
        let _ = (object, prim, u, v);
        ng
    }
    /// Volumes enclosing `ray.o`, used to seed the volume stack.
    fn volume_stack_init(&self, ray: &Ray, visibility: u32) -> VolumeStack;
}

pub trait ShadingService: Sync + Send {
    type Closures: Clone + Send + Sync;
    /// Evaluates the surface shader, filling in `sd.flag` and the emission, transparency
    /// and holdout closures.
    fn eval_surface(&self, sd: &mut ShaderData, path_flag: u32) -> Self::Closures;
    fn sample_bsdf(&self, sd: &ShaderData, closures: &Self::Closures, u: Vec3) -> Option<BsdfSample>;
    fn eval_bsdf(&self, sd: &ShaderData, closures: &Self::Closures, wo: Vec3) -> (BsdfEval, f32);
    fn eval_background(&self, ray: &Ray, path_flag: u32) -> EmissionEval;
    fn eval_light_emission(&self, ray: &Ray, isect: &Intersection, path_flag: u32) -> Option<EmissionEval>;
    fn eval_volume(&self, sd: &ShaderData, entry: VolumeStackEntry, path_flag: u32) -> VolumeShading;
    fn eval_volume_extinction(&self, sd: &ShaderData, entry: VolumeStackEntry, path_flag: u32) -> Spectrum {
        let shading = self.eval_volume(sd, entry, path_flag);
        if shading.flag.contains(ShaderFlags::EXTINCTION) {
            shading.coeff.sigma_t
        } else {
            Spectrum::zero()
        }
    }
    /// Bounds of the extinction of `entry` over `t` along `ray`. Without them a few points
    /// of the segment are shaded to estimate the majorant.
    fn volume_extinction_bounds(&self, _entry: VolumeStackEntry, _ray: &Ray, _t: Interval) -> Option<Extrema> {
        None
    }
    fn sample_phase(&self, sd: &ShaderData, phases: &ShaderVolumePhases, u: Vec2) -> Option<BsdfSample> {
        sample_phases(phases, sd.wi, u)
    }
    fn eval_phase(&self, sd: &ShaderData, phases: &ShaderVolumePhases, wo: Vec3) -> (BsdfEval, f32) {
        eval_phases(phases, sd.wi, wo)
    }
}

pub trait LightSampler: Sync + Send {
    #[allow(clippy::too_many_arguments)]
    fn sample_light(
        &self,
        u: Vec3,
        time: f32,
        p: Vec3,
        n: Vec3,
        shader_flags: ShaderFlags,
        bounce: u32,
        path_flag: u32,
    ) -> Option<LightSample>;
    /// Samples a light for a ray segment through a volume, where the shading point is not
    /// known yet.
    #[allow(clippy::too_many_arguments)]
    fn sample_light_from_volume_segment(
        &self,
        u: Vec3,
        time: f32,
        p: Vec3,
        d: Vec3,
        t: f32,
        bounce: u32,
        path_flag: u32,
    ) -> Option<LightSample>;
    /// Restricts `t_range` to the part of the ray that can see the sampled light.
    fn valid_ray_segment(&self, _ls: &LightSample, _p: Vec3, _d: Vec3, t_range: &mut Interval) -> bool {
        !t_range.is_empty()
    }
    /// Returns a lamp intersection closer than `isect`, if any.
    fn intersect_lights(&self, ray: &Ray, isect: Option<&Intersection>, path_flag: u32) -> Option<Intersection>;
    /// Light sampling pdf of an emissive triangle hit by a BSDF ray.
    fn emissive_surface_pdf(&self, _sd: &ShaderData) -> f32 {
        0.0
    }
}

pub trait Camera: Sync + Send {
    /// A ray with `tmax == 0` is not traced.
    fn generate_ray(&self, x: u32, y: u32, filter_u: Vec2, lens_u: Vec2, time_u: f32) -> Ray;
    fn needs_lens_time(&self) -> bool {
        false
    }
    fn is_inside_volume(&self) -> bool {
        false
    }
    /// Unit direction from `p` toward the camera.
    fn direction_from_point(&self, p: Vec3) -> Vec3;
}

/// Everything a kernel may query.
pub trait SceneServices: SceneQuery + ShadingService + LightSampler + Camera {}
impl<T: SceneQuery + ShadingService + LightSampler + Camera> SceneServices for T {}
