//! In-memory scene services and kernel harness for the kernel tests.
use crate::path_state::*;
use crate::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub const LAMP_SHADER: ShaderId = 1000;

/// Lambertian surface with optional emission, transparency and holdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockSurface {
    pub reflectance: Spectrum,
    pub emission: Spectrum,
    pub transparency: Spectrum,
    pub holdout: Spectrum,
}

pub struct MockScene {
    pub closest: Option<Intersection>,
    pub lamp_hit: Option<Intersection>,
    pub occluded: bool,
    pub shader_flags: HashMap<ShaderId, ShaderFlags>,
    pub object_flags: HashMap<ObjectId, ObjectFlags>,
    pub object_lightgroups: HashMap<ObjectId, u32>,
    pub surfaces: HashMap<ShaderId, MockSurface>,
    pub volumes: HashMap<ShaderId, VolumeShading>,
    pub volume_step_size: f32,
    /// Number of volume shader evaluations so far.
    pub volume_evals: AtomicU32,
    /// Scales the volume coefficients by position.
    pub volume_density: Option<fn(Vec3) -> f32>,
    pub extinction_bounds: Option<Extrema>,
    pub initial_volume_stack: VolumeStack,
    /// Light as placed in the scene, `eval` is the intensity at unit distance.
    pub light: Option<LightSample>,
    pub lamp_emission: Option<EmissionEval>,
    pub background: EmissionEval,
    pub emissive_pdf: f32,
    pub camera_position: Vec3,
    pub camera_inside_volume: bool,
    pub camera_rejects: bool,
    pub needs_lens_time: bool,
}

impl MockScene {
    pub fn new() -> Self {
        Self {
            closest: None,
            lamp_hit: None,
            occluded: false,
            shader_flags: HashMap::new(),
            object_flags: HashMap::new(),
            object_lightgroups: HashMap::new(),
            surfaces: HashMap::new(),
            volumes: HashMap::new(),
            volume_step_size: f32::MAX,
            volume_evals: AtomicU32::new(0),
            volume_density: None,
            extinction_bounds: None,
            initial_volume_stack: VolumeStack::new(),
            light: None,
            lamp_emission: None,
            background: EmissionEval {
                eval: Spectrum::zero(),
                light_pdf: 0.0,
                use_mis: false,
                group: None,
                use_caustics: false,
            },
            emissive_pdf: 0.0,
            camera_position: vec3(0.5, 0.5, -1.0),
            camera_inside_volume: false,
            camera_rejects: false,
            needs_lens_time: false,
        }
    }
    pub fn add_volume_shader(&mut self, shader: ShaderId, flags: ShaderFlags) {
        self.shader_flags.insert(shader, flags);
    }
    pub fn add_surface(&mut self, shader: ShaderId, surface: MockSurface, flags: ShaderFlags) {
        let mut flags = flags;
        if !surface.emission.is_black() {
            flags |= ShaderFlags::HAS_EMISSION;
        }
        if !surface.transparency.is_black() {
            flags |= ShaderFlags::HAS_TRANSPARENT_SHADOW;
        }
        self.shader_flags.insert(shader, flags);
        self.surfaces.insert(shader, surface);
    }
    pub fn set_background(&mut self, eval: Spectrum, light_pdf: f32) {
        self.background = EmissionEval {
            eval,
            light_pdf,
            use_mis: light_pdf > 0.0,
            group: None,
            use_caustics: false,
        };
    }
    fn light_seen_from(&self, p: Vec3) -> Option<LightSample> {
        let mut ls = self.light?;
        if ls.t == f32::MAX {
            return Some(ls);
        }
        let to_light = ls.p - p;
        let t = to_light.length();
        if t == 0.0 {
            return None;
        }
        ls.d = to_light / t;
        ls.t = t;
        ls.eval = ls.eval / (t * t);
        Some(ls)
    }
}

pub fn absorber(sigma_t: f32) -> VolumeShading {
    VolumeShading {
        flag: ShaderFlags::EXTINCTION,
        coeff: VolumeShaderCoefficients {
            sigma_t: Spectrum::splat(sigma_t),
            ..Default::default()
        },
        phases: ShaderVolumePhases::new(),
    }
}

/// Isotropic medium without absorption.
pub fn scatterer(sigma_s: f32) -> VolumeShading {
    let mut phases = ShaderVolumePhases::new();
    phases.push(ShaderVolumeClosure {
        weight: Spectrum::one(),
        sample_weight: 1.0,
        g: 0.0,
    });
    VolumeShading {
        flag: ShaderFlags::EXTINCTION | ShaderFlags::SCATTER,
        coeff: VolumeShaderCoefficients {
            sigma_t: Spectrum::splat(sigma_s),
            sigma_s: Spectrum::splat(sigma_s),
            ..Default::default()
        },
        phases,
    }
}

/// Camera path along +Z inside volume `shader`, `length` away from the next surface.
pub fn in_volume(harness: &Harness, kg: &KernelGlobals<MockScene>, shader: ShaderId, length: f32) -> IntegratorState {
    let mut state = harness.camera_state(kg);
    state.ray = Ray::new(Vec3::ZERO, Vec3::Z);
    state.isect = surface_hit(length, 0);
    state.volume_stack.push(VolumeStackEntry { object: 7, shader });
    state.next_kernel(DeviceKernel::ShadeVolume);
    state
}

pub fn surface_hit(t: f32, object: ObjectId) -> Intersection {
    Intersection {
        t,
        u: 0.25,
        v: 0.25,
        object,
        prim: 0,
        ty: PrimitiveType::Triangle,
    }
}

pub fn lamp_hit(t: f32) -> Intersection {
    Intersection {
        t,
        u: 0.0,
        v: 0.0,
        object: OBJECT_NONE,
        prim: 0,
        ty: PrimitiveType::Lamp,
    }
}

pub fn point_light(p: Vec3, eval: Spectrum, group: Option<u32>) -> LightSample {
    LightSample {
        p,
        d: Vec3::Z,
        t: 1.0,
        eval,
        pdf: 1.0,
        shader_flags: ShaderFlags::USE_MIS,
        group,
        object: OBJECT_NONE,
        prim: PRIM_NONE,
        use_caustics: false,
    }
}

pub fn lamp_emission(eval: Spectrum, light_pdf: f32) -> EmissionEval {
    EmissionEval {
        eval,
        light_pdf,
        use_mis: true,
        group: None,
        use_caustics: false,
    }
}

impl SceneQuery for MockScene {
    fn intersect(&self, ray: &Ray, _visibility: u32) -> Option<Intersection> {
        self.closest.filter(|isect| isect.t <= ray.tmax)
    }
    fn intersect_shadow(&self, _ray: &Ray, _visibility: u32) -> bool {
        self.occluded
    }
    fn shader_flags(&self, shader: ShaderId) -> ShaderFlags {
        self.shader_flags.get(&shader).copied().unwrap_or_default()
    }
    fn object_flags(&self, object: ObjectId) -> ObjectFlags {
        self.object_flags.get(&object).copied().unwrap_or_default()
    }
    fn intersection_shader(&self, isect: &Intersection) -> ShaderId {
        if isect.is_lamp() {
            LAMP_SHADER
        } else {
            isect.object
        }
    }
    fn shader_setup_from_ray(&self, ray: &Ray, isect: &Intersection) -> ShaderData {
        let mut sd = ShaderData::new(ray.at(isect.t), -ray.d, ray.time);
        sd.ng = Vec3::Z;
        sd.n = Vec3::Z;
        sd.ray_length = isect.t;
        sd.u = isect.u;
        sd.v = isect.v;
        sd.object = isect.object;
        sd.prim = isect.prim;
        sd.ty = isect.ty;
        sd.shader = self.intersection_shader(isect);
        sd.flag = self.shader_flags(sd.shader);
        sd.object_flag = self.object_flags(isect.object);
        if ray.d.dot(sd.ng) > 0.0 {
            sd.flag |= ShaderFlags::BACKFACING;
            sd.ng = -sd.ng;
            sd.n = -sd.n;
        }
        sd
    }
    fn object_volume_step_size(&self, _object: ObjectId) -> f32 {
        self.volume_step_size
    }
    fn object_lightgroup(&self, object: ObjectId) -> Option<u32> {
        self.object_lightgroups.get(&object).copied()
    }
    fn triangle_point_normal(&self, object: ObjectId, _prim: PrimId, u: f32, v: f32) -> (Vec3, Vec3, ShaderId) {
        (vec3(u, v, 0.0), Vec3::Z, object)
    }
    fn volume_stack_init(&self, _ray: &Ray, _visibility: u32) -> VolumeStack {
        self.initial_volume_stack.clone()
    }
}

impl ShadingService for MockScene {
    /// Lambertian reflectance, `None` for surfaces without a BSDF.
    type Closures = Option<Spectrum>;

    fn eval_surface(&self, sd: &mut ShaderData, _path_flag: u32) -> Self::Closures {
        let surface = self.surfaces.get(&sd.shader).copied().unwrap_or_default();
        sd.closure_emission_background = surface.emission;
        sd.closure_transparent_extinction = surface.transparency;
        sd.closure_holdout = surface.holdout;
        sd.albedo = surface.reflectance;
        if !surface.emission.is_black() {
            sd.flag |= ShaderFlags::EMISSION;
        }
        if !surface.transparency.is_black() {
            sd.flag |= ShaderFlags::TRANSPARENT;
        }
        if !surface.holdout.is_black() {
            sd.flag |= ShaderFlags::HOLDOUT;
        }
        if surface.reflectance.is_black() {
            return None;
        }
        sd.flag |= ShaderFlags::BSDF | ShaderFlags::BSDF_HAS_EVAL;
        Some(surface.reflectance)
    }
    fn sample_bsdf(&self, sd: &ShaderData, closures: &Self::Closures, u: Vec3) -> Option<BsdfSample> {
        let reflectance = (*closures)?;
        let (wo, pdf) = sample_cos_hemisphere(sd.n, vec2(u.x, u.y));
        if pdf == 0.0 {
            return None;
        }
        Some(BsdfSample {
            wo,
            eval: BsdfEval::new(Label::REFLECT | Label::DIFFUSE, reflectance * pdf),
            pdf,
            label: Label::REFLECT | Label::DIFFUSE,
        })
    }
    fn eval_bsdf(&self, sd: &ShaderData, closures: &Self::Closures, wo: Vec3) -> (BsdfEval, f32) {
        let cos_theta = wo.dot(sd.n);
        match closures {
            Some(reflectance) if cos_theta > 0.0 => {
                let pdf = cos_theta * FRAC_1_PI;
                (BsdfEval::new(Label::REFLECT | Label::DIFFUSE, *reflectance * pdf), pdf)
            }
            _ => (BsdfEval::zero(), 0.0),
        }
    }
    fn eval_background(&self, _ray: &Ray, _path_flag: u32) -> EmissionEval {
        self.background
    }
    fn eval_light_emission(&self, _ray: &Ray, _isect: &Intersection, _path_flag: u32) -> Option<EmissionEval> {
        self.lamp_emission
    }
    fn eval_volume(&self, sd: &ShaderData, entry: VolumeStackEntry, _path_flag: u32) -> VolumeShading {
        self.volume_evals.fetch_add(1, Ordering::Relaxed);
        let mut shading = self.volumes.get(&entry.shader).cloned().unwrap_or_default();
        if let Some(density) = self.volume_density {
            let scale = density(sd.p);
            shading.coeff.sigma_t *= scale;
            shading.coeff.sigma_s *= scale;
            shading.coeff.emission *= scale;
        }
        shading
    }
    fn volume_extinction_bounds(&self, _entry: VolumeStackEntry, _ray: &Ray, _t: Interval) -> Option<Extrema> {
        self.extinction_bounds
    }
}

impl LightSampler for MockScene {
    fn sample_light(
        &self,
        _u: Vec3,
        _time: f32,
        p: Vec3,
        _n: Vec3,
        _shader_flags: ShaderFlags,
        _bounce: u32,
        _path_flag: u32,
    ) -> Option<LightSample> {
        self.light_seen_from(p)
    }
    fn sample_light_from_volume_segment(
        &self,
        _u: Vec3,
        _time: f32,
        p: Vec3,
        _d: Vec3,
        _t: f32,
        _bounce: u32,
        _path_flag: u32,
    ) -> Option<LightSample> {
        self.light_seen_from(p)
    }
    fn intersect_lights(&self, _ray: &Ray, isect: Option<&Intersection>, _path_flag: u32) -> Option<Intersection> {
        let lamp = self.lamp_hit?;
        match isect {
            Some(closest) if closest.t <= lamp.t => None,
            _ => Some(lamp),
        }
    }
    fn emissive_surface_pdf(&self, _sd: &ShaderData) -> f32 {
        self.emissive_pdf
    }
}

impl Camera for MockScene {
    /// Pixel `(x, y)` maps to the ray origin `(x + filter.x, y + filter.y, 0)` looking down +Z.
    fn generate_ray(&self, x: u32, y: u32, filter_u: Vec2, _lens_u: Vec2, time_u: f32) -> Ray {
        let mut ray = Ray::new(vec3(x as f32 + filter_u.x, y as f32 + filter_u.y, 0.0), Vec3::Z);
        if self.camera_rejects {
            ray.tmax = 0.0;
        }
        if self.needs_lens_time {
            ray.time = time_u;
        }
        ray
    }
    fn needs_lens_time(&self) -> bool {
        self.needs_lens_time
    }
    fn is_inside_volume(&self) -> bool {
        self.camera_inside_volume
    }
    fn direction_from_point(&self, p: Vec3) -> Vec3 {
        (self.camera_position - p).normalize_or_zero()
    }
}

/// Owns everything a [`KernelGlobals`] borrows.
pub struct Harness {
    pub data: KernelData,
    pub tile: WorkTile,
    pub buffer: RenderBuffer,
    pub paths: StateArena<IntegratorState>,
    pub shadows: StateArena<ShadowPathState>,
}

impl Harness {
    pub fn new(config: IntegratorConfig, width: u32, height: u32) -> Self {
        let data = KernelData::new(&config).unwrap();
        let buffer = RenderBuffer::new(width, height, data.film.pass_stride);
        Self {
            tile: WorkTile::full_frame(width, height, config.spp),
            buffer,
            paths: StateArena::new(64),
            shadows: StateArena::new(64),
            data,
        }
    }
    pub fn globals<'a>(&'a self, scene: &'a MockScene) -> KernelGlobals<'a, MockScene> {
        KernelGlobals {
            data: &self.data,
            scene,
            render_buffer: &self.buffer,
            paths: &self.paths,
            shadows: &self.shadows,
        }
    }
    /// Fresh camera path of pixel 0, sample 0, looking down +Z from the origin.
    pub fn camera_state(&self, kg: &KernelGlobals<MockScene>) -> IntegratorState {
        let mut state = IntegratorState::default();
        path_state_init(&mut state, &self.tile, 0, 0);
        path_state_init_integrator(kg.data, &mut state, 0, kg.data.sampling.hash_pixel(0, 0));
        state.ray = Ray::new(Vec3::ZERO, Vec3::Z);
        state.next_kernel(DeviceKernel::IntersectClosest);
        state
    }
    /// Shadow paths currently queued, in slot order.
    pub fn queued_shadows(&self) -> Vec<ShadowPathState> {
        self.shadows
            .handles(|_| true)
            .into_iter()
            .filter_map(|h| self.shadows.get_cloned(h))
            .collect()
    }
}
