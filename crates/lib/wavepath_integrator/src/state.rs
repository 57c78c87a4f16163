//! Per-path records and the slot arena they live in.
use crate::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PathRayFlag: u32 {
        // visibility, also used as the ray visibility mask
        const CAMERA = 1 << 0;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SINGULAR = 1 << 5;
        const TRANSPARENT = 1 << 6;
        const VOLUME_SCATTER = 1 << 7;
        const SHADOW_OPAQUE = 1 << 8;
        const SHADOW_TRANSPARENT = 1 << 9;
        const SHADOW = Self::SHADOW_OPAQUE.bits() | Self::SHADOW_TRANSPARENT.bits();
        const ALL_VISIBILITY = (1 << 10) - 1;

        const MIS_SKIP = 1 << 10;
        const DIFFUSE_ANCESTOR = 1 << 11;
        const MIS_HAD_TRANSMISSION = 1 << 12;
        const TRANSPARENT_BACKGROUND = 1 << 13;
        const DENOISING_FEATURES = 1 << 14;

        // light pass category, set once per path
        const REFLECT_PASS = 1 << 15;
        const TRANSMISSION_PASS = 1 << 16;
        const VOLUME_PASS = 1 << 17;
        const SURFACE_PASS = Self::REFLECT_PASS.bits() | Self::TRANSMISSION_PASS.bits();
        const ANY_PASS = Self::SURFACE_PASS.bits() | Self::VOLUME_PASS.bits();

        const SHADOW_CATCHER_HIT = 1 << 18;
        const SHADOW_CATCHER_PASS = 1 << 19;
        const SHADOW_CATCHER_BACKGROUND = 1 << 20;

        // shadow paths
        const SHADOW_FOR_LIGHT = 1 << 21;
        const SHADOW_FOR_AO = 1 << 22;
    }
}

/// Visibility bits of the shadow catcher pass live above the regular ones.
pub const SHADOW_CATCHER_VISIBILITY_SHIFT: u32 = 16;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MneeFlag: u32 {
        const RECEIVER_ANCESTOR = 1 << 0;
        const CULL_LIGHT_CONNECTION = 1 << 1;
    }
}

/// Deferred path termination. Requests only ever escalate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Termination {
    #[default]
    Continue,
    /// Keep going through transparent surfaces, stop at the next opaque one.
    TerminateAfterTransparent,
    /// Evaluate emission of the next surface, then stop.
    TerminateOnNextSurface,
    /// Evaluate emission and absorption of the next volume segment, then stop.
    TerminateInNextVolume,
}
impl Termination {
    pub fn is_immediate(&self) -> bool {
        *self >= Termination::TerminateOnNextSurface
    }
    pub fn is_requested(&self) -> bool {
        *self != Termination::Continue
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuidingHandle(pub u32);

#[derive(Clone, Debug)]
pub struct PathState {
    pub flag: PathRayFlag,
    pub termination: Termination,
    pub bounce: u32,
    pub diffuse_bounce: u32,
    pub glossy_bounce: u32,
    pub transmission_bounce: u32,
    pub transparent_bounce: u32,
    pub volume_bounce: u32,
    pub volume_bounds_bounce: u32,
    pub throughput: Spectrum,
    pub denoising_feature_throughput: Spectrum,
    pub rng_hash: u32,
    pub rng_offset: u32,
    pub sample: u32,
    pub min_ray_pdf: f32,
    pub mis_ray_pdf: f32,
    pub continuation_probability: f32,
    /// Majorant optical depth of the media crossed by the camera ray.
    pub optical_depth: f32,
    pub render_pixel_index: u32,
    pub pass_diffuse_weight: Spectrum,
    pub pass_glossy_weight: Spectrum,
    pub mnee: MneeFlag,
    pub queued_kernel: Option<DeviceKernel>,
    pub shader_sort_key: u32,
}

impl Default for PathState {
    fn default() -> Self {
        Self {
            flag: PathRayFlag::empty(),
            termination: Termination::Continue,
            bounce: 0,
            diffuse_bounce: 0,
            glossy_bounce: 0,
            transmission_bounce: 0,
            transparent_bounce: 0,
            volume_bounce: 0,
            volume_bounds_bounce: 0,
            throughput: Spectrum::one(),
            denoising_feature_throughput: Spectrum::one(),
            rng_hash: 0,
            rng_offset: 0,
            sample: 0,
            min_ray_pdf: f32::INFINITY,
            mis_ray_pdf: 0.0,
            continuation_probability: 1.0,
            optical_depth: 0.0,
            render_pixel_index: 0,
            pass_diffuse_weight: Spectrum::one(),
            pass_glossy_weight: Spectrum::zero(),
            mnee: MneeFlag::empty(),
            queued_kernel: None,
            shader_sort_key: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntegratorState {
    pub path: PathState,
    pub ray: Ray,
    pub isect: Intersection,
    pub volume_stack: VolumeStack,
    /// Path guiding history, never recorded by this integrator.
    pub guiding: Option<GuidingHandle>,
}

impl Default for IntegratorState {
    fn default() -> Self {
        Self {
            path: PathState::default(),
            ray: Ray::default(),
            isect: Intersection::none(),
            volume_stack: VolumeStack::new(),
            guiding: None,
        }
    }
}

impl IntegratorState {
    pub fn next_kernel(&mut self, kernel: DeviceKernel) {
        self.path.queued_kernel = Some(kernel);
    }
    pub fn next_kernel_sorted(&mut self, kernel: DeviceKernel, key: u32) {
        self.path.queued_kernel = Some(kernel);
        self.path.shader_sort_key = key;
    }
    pub fn terminate(&mut self) {
        self.path.queued_kernel = None;
    }
    pub fn is_terminated(&self) -> bool {
        self.path.queued_kernel.is_none()
    }
}

/// Side record of a light or AO shadow ray.
#[derive(Clone, Debug)]
pub struct ShadowPathState {
    pub render_pixel_index: u32,
    pub flag: PathRayFlag,
    pub bounce: u32,
    pub diffuse_bounce: u32,
    pub glossy_bounce: u32,
    pub transmission_bounce: u32,
    pub transparent_bounce: u32,
    pub volume_bounds_bounce: u32,
    pub rng_hash: u32,
    pub rng_offset: u32,
    pub sample: u32,
    pub throughput: Spectrum,
    pub unshadowed_throughput: Spectrum,
    pub pass_diffuse_weight: Spectrum,
    pub pass_glossy_weight: Spectrum,
    /// Light group plus one, 0 for none.
    pub lightgroup: u32,
    pub ray: Ray,
    pub volume_stack: VolumeStack,
    pub queued_kernel: Option<DeviceKernel>,
}

impl ShadowPathState {
    /// Copies the bookkeeping of the main path that spawns this shadow ray.
    pub fn from_path(path: &PathState, flag: PathRayFlag, throughput: Spectrum, ray: Ray) -> Self {
        Self {
            render_pixel_index: path.render_pixel_index,
            flag,
            bounce: path.bounce,
            diffuse_bounce: path.diffuse_bounce,
            glossy_bounce: path.glossy_bounce,
            transmission_bounce: path.transmission_bounce,
            transparent_bounce: path.transparent_bounce,
            volume_bounds_bounce: path.volume_bounds_bounce,
            rng_hash: path.rng_hash,
            rng_offset: path.rng_offset,
            sample: path.sample,
            throughput,
            unshadowed_throughput: throughput,
            pass_diffuse_weight: path.pass_diffuse_weight,
            pass_glossy_weight: path.pass_glossy_weight,
            lightgroup: 0,
            ray,
            volume_stack: VolumeStack::new(),
            queued_kernel: Some(DeviceKernel::IntersectShadow),
        }
    }
    pub fn rng_state(&self) -> RngState {
        RngState {
            rng_hash: self.rng_hash,
            rng_offset: self.rng_offset,
            sample: self.sample,
        }
    }
    pub fn terminate(&mut self) {
        self.queued_kernel = None;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateHandle(u32);
impl StateHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Fixed capacity slot storage. Each slot is locked by exactly one kernel at a time.
pub struct StateArena<T> {
    slots: Vec<Mutex<Option<T>>>,
    free: Mutex<Vec<u32>>,
    num_live: AtomicUsize,
}

impl<T: Send> StateArena<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            free: Mutex::new((0..capacity as u32).rev().collect()),
            num_live: AtomicUsize::new(0),
        }
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    pub fn num_live(&self) -> usize {
        self.num_live.load(Ordering::Acquire)
    }
    pub fn num_free(&self) -> usize {
        self.capacity() - self.num_live()
    }
    pub fn alloc(&self, value: T) -> Option<StateHandle> {
        let index = self.free.lock().pop()?;
        let mut slot = self.slots[index as usize].lock();
        debug_assert!(slot.is_none());
        *slot = Some(value);
        self.num_live.fetch_add(1, Ordering::AcqRel);
        Some(StateHandle(index))
    }
    pub fn release(&self, handle: StateHandle) {
        let taken = self.slots[handle.index()].lock().take();
        if taken.is_some() {
            self.num_live.fetch_sub(1, Ordering::AcqRel);
            self.free.lock().push(handle.0);
        }
    }
    /// Runs `f` on the slot, `None` if the slot is empty.
    pub fn with<R, F: FnOnce(&mut T) -> R>(&self, handle: StateHandle, f: F) -> Option<R> {
        self.slots[handle.index()].lock().as_mut().map(f)
    }
    /// Handles of occupied slots matching `pred`, in slot order.
    pub fn handles<F: Fn(&T) -> bool>(&self, pred: F) -> Vec<StateHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.lock()
                    .as_ref()
                    .filter(|v| pred(v))
                    .map(|_| StateHandle(i as u32))
            })
            .collect()
    }
}

impl<T: Send + Clone> StateArena<T> {
    pub fn get_cloned(&self, handle: StateHandle) -> Option<T> {
        self.slots[handle.index()].lock().clone()
    }
}
