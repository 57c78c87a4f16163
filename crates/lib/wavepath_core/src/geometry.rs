use crate::*;

pub type ObjectId = u32;
pub type PrimId = u32;
pub type ShaderId = u32;

pub const OBJECT_NONE: ObjectId = u32::MAX;
pub const PRIM_NONE: PrimId = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}
impl Interval {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
    pub fn length(&self) -> f32 {
        self.max - self.min
    }
    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }
    pub fn contains(&self, t: f32) -> bool {
        t >= self.min && t <= self.max
    }
    pub fn intersect(&self, other: Interval) -> Interval {
        Interval::new(self.min.max(other.min), self.max.min(other.max))
    }
}

/// Range of a density along a ray segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extrema {
    pub min: f32,
    pub max: f32,
}
impl Extrema {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
    /// Identity of [`Extrema::merge`].
    pub const fn empty() -> Self {
        Self::new(f32::MAX, -f32::MAX)
    }
    pub fn merge(&self, value: f32) -> Self {
        Self::new(self.min.min(value), self.max.max(value))
    }
    pub fn range(&self) -> f32 {
        self.max - self.min
    }
}
impl std::ops::Add for Extrema {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.min + rhs.min, self.max + rhs.max)
    }
}

/// Compact ray differential, a single footprint scale.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Differential {
    pub dp: f32,
    pub dd: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub o: Vec3,
    pub d: Vec3,
    pub tmin: f32,
    pub tmax: f32,
    pub time: f32,
    pub differential: Differential,
    pub self_object: ObjectId,
    pub self_prim: PrimId,
}
impl Default for Ray {
    fn default() -> Self {
        Self {
            o: Vec3::ZERO,
            d: Vec3::Z,
            tmin: 0.0,
            tmax: f32::MAX,
            time: 0.5,
            differential: Differential::default(),
            self_object: OBJECT_NONE,
            self_prim: PRIM_NONE,
        }
    }
}
impl Ray {
    pub fn new(o: Vec3, d: Vec3) -> Self {
        Self {
            o,
            d,
            ..Default::default()
        }
    }
    pub fn at(&self, t: f32) -> Vec3 {
        self.o + self.d * t
    }
    pub fn interval(&self) -> Interval {
        Interval::new(self.tmin, self.tmax)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    Triangle,
    Lamp,
    VolumeBound,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub object: ObjectId,
    pub prim: PrimId,
    pub ty: PrimitiveType,
}
impl Intersection {
    /// Miss record, `prim == PRIM_NONE`.
    pub fn none() -> Self {
        Self {
            t: f32::MAX,
            u: 0.0,
            v: 0.0,
            object: OBJECT_NONE,
            prim: PRIM_NONE,
            ty: PrimitiveType::Triangle,
        }
    }
    pub fn is_hit(&self) -> bool {
        self.prim != PRIM_NONE
    }
    pub fn is_lamp(&self) -> bool {
        self.ty == PrimitiveType::Lamp
    }
}

/// Orthonormal basis around `n`.
pub fn make_orthonormals(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let t = vec3(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let s = vec3(b, sign + n.y * n.y * a, -n.y);
    (t, s)
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn test_extrema_merge() {
        let e = [0.3, 2.0, 1.1].iter().fold(Extrema::empty(), |e, &v| e.merge(v));
        assert_eq!(e, Extrema::new(0.3, 2.0));
        assert_eq!((e + Extrema::new(1.0, 1.0)).range(), 1.7);
    }
    #[test]
    fn test_orthonormals() {
        for n in [Vec3::X, Vec3::Y, Vec3::Z, -Vec3::Z, vec3(1.0, 2.0, -3.0).normalize()] {
            let (t, s) = make_orthonormals(n);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(s.dot(n).abs() < 1e-5);
            assert!(t.dot(s).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
        }
    }
    #[test]
    fn test_interval() {
        let i = Interval::new(1.0, 3.0);
        assert!(i.contains(1.0) && i.contains(3.0) && !i.contains(3.5));
        assert!(Interval::new(2.0, 2.0).is_empty());
        assert_eq!(i.intersect(Interval::new(2.0, 5.0)), Interval::new(2.0, 3.0));
    }
}
