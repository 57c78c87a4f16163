//! Built-in analytic scene: a diffuse ground plane, a sphere on top of it, a point light and
//! a constant sky, seen through a pinhole camera.
use wavepath::bsdf::*;
use wavepath::scene::*;
use wavepath::*;

pub const GROUND: ObjectId = 0;
pub const SPHERE: ObjectId = 1;

/// Self intersection tolerance, relative to the sphere radius.
const SELF_HIT_EPSILON: f32 = 1e-4;

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    /// Nearest root in `(tmin, tmax)`. Rays leaving the sphere itself skip the root at the origin.
    pub fn intersect(&self, ray: &Ray, skip_self: bool) -> Option<f32> {
        let oc = ray.o - self.center;
        let a = ray.d.length_squared();
        let half_b = oc.dot(ray.d);
        let c = oc.length_squared() - self.radius * self.radius;
        let discriminant = half_b * half_b - a * c;
        if discriminant < 0.0 || a == 0.0 {
            return None;
        }
        let sqrt_d = discriminant.sqrt();
        let tmin = if skip_self {
            ray.tmin.max(SELF_HIT_EPSILON * self.radius)
        } else {
            ray.tmin
        };
        [(-half_b - sqrt_d) / a, (-half_b + sqrt_d) / a]
            .into_iter()
            .find(|&t| t > tmin && t < ray.tmax)
    }
    pub fn normal(&self, p: Vec3) -> Vec3 {
        (p - self.center).normalize_or_zero()
    }
    fn uv(&self, p: Vec3) -> Vec2 {
        let n = self.normal(p);
        let phi = n.z.atan2(n.x);
        vec2(0.5 + phi / (2.0 * PI), n.y.clamp(-1.0, 1.0).acos() * FRAC_1_PI)
    }
    fn point(&self, u: f32, v: f32) -> Vec3 {
        let phi = (u - 0.5) * 2.0 * PI;
        let theta = v * PI;
        self.center + self.radius * vec3(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
    }
}

/// Horizontal plane `y = height`, a square of side `size` centered at the origin.
#[derive(Clone, Copy, Debug)]
pub struct Ground {
    pub height: f32,
    pub size: f32,
}

impl Ground {
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        if ray.d.y == 0.0 {
            return None;
        }
        let t = (self.height - ray.o.y) / ray.d.y;
        if t <= ray.tmin || t >= ray.tmax {
            return None;
        }
        let p = ray.at(t);
        let half = 0.5 * self.size;
        (p.x.abs() <= half && p.z.abs() <= half).then_some(t)
    }
    fn uv(&self, p: Vec3) -> Vec2 {
        vec2(p.x / self.size + 0.5, p.z / self.size + 0.5)
    }
    fn point(&self, u: f32, v: f32) -> Vec3 {
        vec3((u - 0.5) * self.size, self.height, (v - 0.5) * self.size)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PinholeCamera {
    pub position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    tan_half_fov: f32,
    width: u32,
    height: u32,
}

impl PinholeCamera {
    pub fn look_at(position: Vec3, target: Vec3, fov_degrees: f32, width: u32, height: u32) -> Self {
        let forward = (target - position).normalize();
        let right = Vec3::Y.cross(forward).normalize();
        let up = forward.cross(right);
        Self {
            position,
            forward,
            right,
            up,
            tan_half_fov: (0.5 * fov_degrees.to_radians()).tan(),
            width,
            height,
        }
    }
    fn direction(&self, x: f32, y: f32) -> Vec3 {
        let aspect = self.width as f32 / self.height as f32;
        let sx = (2.0 * x / self.width as f32 - 1.0) * self.tan_half_fov * aspect;
        let sy = (1.0 - 2.0 * y / self.height as f32) * self.tan_half_fov;
        (self.forward + self.right * sx + self.up * sy).normalize()
    }
}

pub struct DemoScene {
    pub ground: Ground,
    pub sphere: Sphere,
    pub albedo: [Spectrum; 2],
    pub light_position: Vec3,
    pub light_intensity: Spectrum,
    pub sky: Spectrum,
    pub camera: PinholeCamera,
}

impl DemoScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            ground: Ground {
                height: 0.0,
                size: 20.0,
            },
            sphere: Sphere {
                center: vec3(0.0, 1.0, 0.0),
                radius: 1.0,
            },
            albedo: [Spectrum::splat(0.6), Spectrum::rgb(0.8, 0.25, 0.2)],
            light_position: vec3(2.0, 5.0, -3.0),
            light_intensity: Spectrum::splat(40.0),
            sky: Spectrum::rgb(0.3, 0.4, 0.6),
            camera: PinholeCamera::look_at(vec3(0.0, 1.5, -5.0), vec3(0.0, 0.8, 0.0), 45.0, width, height),
        }
    }

    fn closest_hit(&self, ray: &Ray) -> Option<(f32, ObjectId)> {
        let ground = if ray.self_object == GROUND {
            None
        } else {
            self.ground.intersect(ray)
        };
        let sphere = self.sphere.intersect(ray, ray.self_object == SPHERE);
        match (ground, sphere) {
            (Some(g), Some(s)) if s < g => Some((s, SPHERE)),
            (Some(g), _) => Some((g, GROUND)),
            (None, Some(s)) => Some((s, SPHERE)),
            (None, None) => None,
        }
    }

    fn geometric_normal(&self, object: ObjectId, p: Vec3) -> Vec3 {
        if object == SPHERE {
            self.sphere.normal(p)
        } else {
            Vec3::Y
        }
    }
}

impl SceneQuery for DemoScene {
    fn intersect(&self, ray: &Ray, _visibility: u32) -> Option<Intersection> {
        let (t, object) = self.closest_hit(ray)?;
        let p = ray.at(t);
        let uv = if object == SPHERE {
            self.sphere.uv(p)
        } else {
            self.ground.uv(p)
        };
        Some(Intersection {
            t,
            u: uv.x,
            v: uv.y,
            object,
            prim: 0,
            ty: PrimitiveType::Triangle,
        })
    }
    fn intersect_shadow(&self, ray: &Ray, _visibility: u32) -> bool {
        self.closest_hit(ray).is_some()
    }
    fn shader_flags(&self, _shader: ShaderId) -> ShaderFlags {
        ShaderFlags::empty()
    }
    fn object_flags(&self, _object: ObjectId) -> ObjectFlags {
        ObjectFlags::empty()
    }
    fn intersection_shader(&self, isect: &Intersection) -> ShaderId {
        isect.object
    }
    fn shader_setup_from_ray(&self, ray: &Ray, isect: &Intersection) -> ShaderData {
        let p = ray.at(isect.t);
        let mut sd = ShaderData::new(p, -ray.d, ray.time);
        sd.ng = self.geometric_normal(isect.object, p);
        sd.n = sd.ng;
        sd.ray_length = isect.t;
        sd.u = isect.u;
        sd.v = isect.v;
        sd.object = isect.object;
        sd.prim = isect.prim;
        sd.ty = isect.ty;
        sd.shader = self.intersection_shader(isect);
        sd.flag = self.shader_flags(sd.shader);
        if ray.d.dot(sd.ng) > 0.0 {
            sd.flag |= ShaderFlags::BACKFACING;
            sd.ng = -sd.ng;
            sd.n = -sd.n;
        }
        sd
    }
    fn object_volume_step_size(&self, _object: ObjectId) -> f32 {
        f32::MAX
    }
    fn triangle_point_normal(&self, object: ObjectId, _prim: PrimId, u: f32, v: f32) -> (Vec3, Vec3, ShaderId) {
        let p = if object == SPHERE {
            self.sphere.point(u, v)
        } else {
            self.ground.point(u, v)
        };
        (p, self.geometric_normal(object, p), object)
    }
    fn volume_stack_init(&self, _ray: &Ray, _visibility: u32) -> VolumeStack {
        VolumeStack::new()
    }
}

impl ShadingService for DemoScene {
    /// Lambertian albedo.
    type Closures = Spectrum;

    fn eval_surface(&self, sd: &mut ShaderData, _path_flag: u32) -> Spectrum {
        let albedo = self.albedo[(sd.shader as usize).min(1)];
        sd.albedo = albedo;
        sd.flag |= ShaderFlags::BSDF | ShaderFlags::BSDF_HAS_EVAL;
        albedo
    }
    fn sample_bsdf(&self, sd: &ShaderData, albedo: &Spectrum, u: Vec3) -> Option<BsdfSample> {
        let (wo, pdf) = sample_cos_hemisphere(sd.n, vec2(u.x, u.y));
        if pdf == 0.0 {
            return None;
        }
        let label = Label::REFLECT | Label::DIFFUSE;
        Some(BsdfSample {
            wo,
            eval: BsdfEval::new(label, *albedo * pdf),
            pdf,
            label,
        })
    }
    fn eval_bsdf(&self, sd: &ShaderData, albedo: &Spectrum, wo: Vec3) -> (BsdfEval, f32) {
        let cos_theta = wo.dot(sd.n);
        if cos_theta <= 0.0 {
            return (BsdfEval::zero(), 0.0);
        }
        let pdf = cos_theta * FRAC_1_PI;
        (BsdfEval::new(Label::REFLECT | Label::DIFFUSE, *albedo * pdf), pdf)
    }
    fn eval_background(&self, _ray: &Ray, _path_flag: u32) -> EmissionEval {
        EmissionEval {
            eval: self.sky,
            light_pdf: 0.0,
            use_mis: false,
            group: None,
            use_caustics: false,
        }
    }
    fn eval_light_emission(&self, _ray: &Ray, _isect: &Intersection, _path_flag: u32) -> Option<EmissionEval> {
        None
    }
    fn eval_volume(&self, _sd: &ShaderData, _entry: VolumeStackEntry, _path_flag: u32) -> VolumeShading {
        VolumeShading::default()
    }
}

impl DemoScene {
    fn sample_point_light(&self, p: Vec3) -> Option<LightSample> {
        let to_light = self.light_position - p;
        let t = to_light.length();
        if t == 0.0 {
            return None;
        }
        Some(LightSample {
            p: self.light_position,
            d: to_light / t,
            t,
            eval: self.light_intensity / (t * t),
            pdf: 1.0,
            shader_flags: ShaderFlags::empty(),
            group: None,
            object: OBJECT_NONE,
            prim: PRIM_NONE,
            use_caustics: false,
        })
    }
}

impl LightSampler for DemoScene {
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
        self.sample_point_light(p)
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
        self.sample_point_light(p)
    }
    fn intersect_lights(&self, _ray: &Ray, _isect: Option<&Intersection>, _path_flag: u32) -> Option<Intersection> {
        None
    }
}

impl Camera for DemoScene {
    fn generate_ray(&self, x: u32, y: u32, filter_u: Vec2, _lens_u: Vec2, _time_u: f32) -> Ray {
        let d = self.camera.direction(x as f32 + filter_u.x, y as f32 + filter_u.y);
        Ray::new(self.camera.position, d)
    }
    fn direction_from_point(&self, p: Vec3) -> Vec3 {
        (self.camera.position - p).normalize_or_zero()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use wavepath::statrs::assert_almost_eq;

    #[test]
    fn test_sphere_hit_from_outside() {
        let sphere = Sphere {
            center: vec3(0.0, 0.0, 5.0),
            radius: 1.0,
        };
        let t = sphere.intersect(&Ray::new(Vec3::ZERO, Vec3::Z), false).unwrap();
        assert_almost_eq!(t as f64, 4.0, 1e-5);
        assert!(sphere.intersect(&Ray::new(Vec3::ZERO, -Vec3::Z), false).is_none());
        assert!(sphere.intersect(&Ray::new(vec3(2.0, 0.0, 0.0), Vec3::Z), false).is_none());
    }

    #[test]
    fn test_sphere_skips_own_surface() {
        let sphere = Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        // leaving the top of the sphere upward never hits it again
        let up = Ray::new(vec3(0.0, 1.0, 0.0), Vec3::Y);
        assert!(sphere.intersect(&up, true).is_none());
        // entering at the top reaches the bottom
        let down = Ray::new(vec3(0.0, 1.0, 0.0), -Vec3::Y);
        let t = sphere.intersect(&down, true).unwrap();
        assert_almost_eq!(t as f64, 2.0, 1e-5);
    }

    #[test]
    fn test_ground_bounds() {
        let ground = Ground { height: 0.0, size: 4.0 };
        let down = Ray::new(vec3(1.0, 2.0, 1.0), -Vec3::Y);
        assert_almost_eq!(ground.intersect(&down).unwrap() as f64, 2.0, 1e-6);
        assert!(ground.intersect(&Ray::new(vec3(3.0, 2.0, 0.0), -Vec3::Y)).is_none());
        assert!(ground.intersect(&Ray::new(vec3(0.0, 2.0, 0.0), Vec3::X)).is_none());
        let mut short = down;
        short.tmax = 1.0;
        assert!(ground.intersect(&short).is_none());
    }

    #[test]
    fn test_closest_object() {
        let scene = DemoScene::new(64, 64);
        let isect = scene.intersect(&Ray::new(vec3(0.0, 5.0, 0.0), -Vec3::Y), 0).unwrap();
        assert_eq!(isect.object, SPHERE);
        assert_almost_eq!(isect.t as f64, 3.0, 1e-5);
        let isect = scene.intersect(&Ray::new(vec3(5.0, 5.0, 0.0), -Vec3::Y), 0).unwrap();
        assert_eq!(isect.object, GROUND);
        assert!(scene.intersect(&Ray::new(vec3(0.0, 5.0, 0.0), Vec3::Y), 0).is_none());
    }

    #[test]
    fn test_shadow_ray_from_ground() {
        let scene = DemoScene::new(64, 64);
        let mut ray = Ray::new(Vec3::ZERO, Vec3::Y);
        ray.self_object = GROUND;
        ray.tmax = 10.0;
        assert!(scene.intersect_shadow(&ray, 0));
        ray.tmax = 0.5;
        assert!(!scene.intersect_shadow(&ray, 0));
    }

    #[test]
    fn test_triangle_point_matches_uv() {
        let scene = DemoScene::new(64, 64);
        let ray = Ray::new(vec3(0.3, 5.0, -0.2), -Vec3::Y);
        let isect = scene.intersect(&ray, 0).unwrap();
        let (p, ng, shader) = scene.triangle_point_normal(isect.object, isect.prim, isect.u, isect.v);
        assert!((p - ray.at(isect.t)).length() < 1e-4);
        assert!((ng - scene.sphere.normal(p)).length() < 1e-5);
        assert_eq!(shader, SPHERE);
    }

    #[test]
    fn test_backfacing_flips_normal() {
        let scene = DemoScene::new(64, 64);
        let ray = Ray::new(vec3(3.0, -1.0, 0.0), Vec3::Y);
        let isect = scene.intersect(&ray, 0).unwrap();
        assert_eq!(isect.object, GROUND);
        let sd = scene.shader_setup_from_ray(&ray, &isect);
        assert!(sd.flag.contains(ShaderFlags::BACKFACING));
        assert_eq!(sd.n, -Vec3::Y);
    }

    #[test]
    fn test_camera_center_ray() {
        let scene = DemoScene::new(64, 64);
        let ray = scene.generate_ray(32, 32, Vec2::ZERO, Vec2::ZERO, 0.5);
        let forward = (vec3(0.0, 0.8, 0.0) - scene.camera.position).normalize();
        assert!((ray.d - forward).length() < 1e-5);
        // left half of the image looks toward -x
        let left = scene.generate_ray(0, 32, Vec2::ZERO, Vec2::ZERO, 0.5);
        assert!(left.d.x < 0.0);
    }

    #[test]
    fn test_lambert_sample_matches_eval() {
        let scene = DemoScene::new(64, 64);
        let ray = Ray::new(vec3(0.0, 5.0, 0.0), -Vec3::Y);
        let isect = scene.intersect(&ray, 0).unwrap();
        let mut sd = scene.shader_setup_from_ray(&ray, &isect);
        let albedo = scene.eval_surface(&mut sd, 0);
        let sample = scene.sample_bsdf(&sd, &albedo, vec3(0.3, 0.7, 0.0)).unwrap();
        let (eval, pdf) = scene.eval_bsdf(&sd, &albedo, sample.wo);
        assert_almost_eq!(pdf as f64, sample.pdf as f64, 1e-5);
        assert_almost_eq!(eval.sum[0] as f64, sample.eval.sum[0] as f64, 1e-5);
    }
}
