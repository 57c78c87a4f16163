use crate::util::AtomicFloat;
use crate::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

pub const PASS_UNUSED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    Combined,
    SampleCount,
    AdaptiveAuxBuffer,
    Emission,
    Background,
    Ao,
    Shadow,
    DiffuseDirect,
    DiffuseIndirect,
    GlossyDirect,
    GlossyIndirect,
    TransmissionDirect,
    TransmissionIndirect,
    VolumeDirect,
    VolumeIndirect,
    ShadowCatcher,
    ShadowCatcherSampleCount,
    ShadowCatcherMatte,
    DenoisingAlbedo,
    Position,
    Normal,
    BakePrimitive,
    BakeDifferential,
}
impl PassType {
    pub fn num_components(&self) -> u32 {
        match self {
            PassType::SampleCount | PassType::ShadowCatcherSampleCount => 1,
            PassType::Combined
            | PassType::AdaptiveAuxBuffer
            | PassType::ShadowCatcherMatte
            | PassType::BakePrimitive
            | PassType::BakeDifferential => 4,
            _ => 3,
        }
    }
}

/// Offsets of the active passes within a pixel, `PASS_UNUSED` for inactive ones.
#[derive(Clone, Debug, PartialEq)]
pub struct FilmPasses {
    pub pass_stride: u32,
    pub combined: u32,
    pub sample_count: u32,
    pub adaptive_aux_buffer: u32,
    pub emission: u32,
    pub background: u32,
    pub ao: u32,
    pub shadow: u32,
    pub diffuse_direct: u32,
    pub diffuse_indirect: u32,
    pub glossy_direct: u32,
    pub glossy_indirect: u32,
    pub transmission_direct: u32,
    pub transmission_indirect: u32,
    pub volume_direct: u32,
    pub volume_indirect: u32,
    pub shadow_catcher: u32,
    pub shadow_catcher_sample_count: u32,
    pub shadow_catcher_matte: u32,
    pub denoising_albedo: u32,
    pub position: u32,
    pub normal: u32,
    pub bake_primitive: u32,
    pub bake_differential: u32,
    /// First light group, each group takes 3 floats.
    pub lightgroup: u32,
    pub num_lightgroups: u32,
}

impl FilmPasses {
    pub fn new(passes: &[PassType], num_lightgroups: u32) -> Self {
        let mut film = Self {
            pass_stride: 0,
            combined: PASS_UNUSED,
            sample_count: PASS_UNUSED,
            adaptive_aux_buffer: PASS_UNUSED,
            emission: PASS_UNUSED,
            background: PASS_UNUSED,
            ao: PASS_UNUSED,
            shadow: PASS_UNUSED,
            diffuse_direct: PASS_UNUSED,
            diffuse_indirect: PASS_UNUSED,
            glossy_direct: PASS_UNUSED,
            glossy_indirect: PASS_UNUSED,
            transmission_direct: PASS_UNUSED,
            transmission_indirect: PASS_UNUSED,
            volume_direct: PASS_UNUSED,
            volume_indirect: PASS_UNUSED,
            shadow_catcher: PASS_UNUSED,
            shadow_catcher_sample_count: PASS_UNUSED,
            shadow_catcher_matte: PASS_UNUSED,
            denoising_albedo: PASS_UNUSED,
            position: PASS_UNUSED,
            normal: PASS_UNUSED,
            bake_primitive: PASS_UNUSED,
            bake_differential: PASS_UNUSED,
            lightgroup: PASS_UNUSED,
            num_lightgroups,
        };
        for pass in passes {
            if film.offset(*pass) != PASS_UNUSED {
                continue;
            }
            let offset = film.pass_stride;
            *film.offset_mut(*pass) = offset;
            film.pass_stride += pass.num_components();
        }
        if num_lightgroups > 0 {
            film.lightgroup = film.pass_stride;
            film.pass_stride += 3 * num_lightgroups;
        }
        film
    }
    fn offset_mut(&mut self, pass: PassType) -> &mut u32 {
        match pass {
            PassType::Combined => &mut self.combined,
            PassType::SampleCount => &mut self.sample_count,
            PassType::AdaptiveAuxBuffer => &mut self.adaptive_aux_buffer,
            PassType::Emission => &mut self.emission,
            PassType::Background => &mut self.background,
            PassType::Ao => &mut self.ao,
            PassType::Shadow => &mut self.shadow,
            PassType::DiffuseDirect => &mut self.diffuse_direct,
            PassType::DiffuseIndirect => &mut self.diffuse_indirect,
            PassType::GlossyDirect => &mut self.glossy_direct,
            PassType::GlossyIndirect => &mut self.glossy_indirect,
            PassType::TransmissionDirect => &mut self.transmission_direct,
            PassType::TransmissionIndirect => &mut self.transmission_indirect,
            PassType::VolumeDirect => &mut self.volume_direct,
            PassType::VolumeIndirect => &mut self.volume_indirect,
            PassType::ShadowCatcher => &mut self.shadow_catcher,
            PassType::ShadowCatcherSampleCount => &mut self.shadow_catcher_sample_count,
            PassType::ShadowCatcherMatte => &mut self.shadow_catcher_matte,
            PassType::DenoisingAlbedo => &mut self.denoising_albedo,
            PassType::Position => &mut self.position,
            PassType::Normal => &mut self.normal,
            PassType::BakePrimitive => &mut self.bake_primitive,
            PassType::BakeDifferential => &mut self.bake_differential,
        }
    }
    pub fn offset(&self, pass: PassType) -> u32 {
        match pass {
            PassType::Combined => self.combined,
            PassType::SampleCount => self.sample_count,
            PassType::AdaptiveAuxBuffer => self.adaptive_aux_buffer,
            PassType::Emission => self.emission,
            PassType::Background => self.background,
            PassType::Ao => self.ao,
            PassType::Shadow => self.shadow,
            PassType::DiffuseDirect => self.diffuse_direct,
            PassType::DiffuseIndirect => self.diffuse_indirect,
            PassType::GlossyDirect => self.glossy_direct,
            PassType::GlossyIndirect => self.glossy_indirect,
            PassType::TransmissionDirect => self.transmission_direct,
            PassType::TransmissionIndirect => self.transmission_indirect,
            PassType::VolumeDirect => self.volume_direct,
            PassType::VolumeIndirect => self.volume_indirect,
            PassType::ShadowCatcher => self.shadow_catcher,
            PassType::ShadowCatcherSampleCount => self.shadow_catcher_sample_count,
            PassType::ShadowCatcherMatte => self.shadow_catcher_matte,
            PassType::DenoisingAlbedo => self.denoising_albedo,
            PassType::Position => self.position,
            PassType::Normal => self.normal,
            PassType::BakePrimitive => self.bake_primitive,
            PassType::BakeDifferential => self.bake_differential,
        }
    }
    pub fn is_active(&self, pass: PassType) -> bool {
        self.offset(pass) != PASS_UNUSED
    }
}

/// A rectangle of pixels and the sample range to render for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkTile {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub start_sample: u32,
    pub num_samples: u32,
    pub sample_offset: u32,
    /// Pixel index of `(0, 0)`.
    pub offset: i64,
    pub stride: u32,
}
impl WorkTile {
    pub fn full_frame(width: u32, height: u32, num_samples: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            w: width,
            h: height,
            start_sample: 0,
            num_samples,
            sample_offset: 0,
            offset: 0,
            stride: width,
        }
    }
    pub fn num_pixels(&self) -> usize {
        self.w as usize * self.h as usize
    }
    pub fn render_pixel_index(&self, x: u32, y: u32) -> u32 {
        (self.offset + x as i64 + y as i64 * self.stride as i64) as u32
    }
}

/// Flat float storage, `pass_stride` floats per pixel. All writes are atomic.
pub struct RenderBuffer {
    data: Vec<AtomicFloat>,
    pass_stride: usize,
    width: u32,
    height: u32,
}

impl RenderBuffer {
    pub fn new(width: u32, height: u32, pass_stride: u32) -> Self {
        let len = width as usize * height as usize * pass_stride as usize;
        Self {
            data: (0..len).map(|_| AtomicFloat::new(0.0)).collect(),
            pass_stride: pass_stride as usize,
            width,
            height,
        }
    }
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn pass_stride(&self) -> usize {
        self.pass_stride
    }
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
    #[inline]
    fn index(&self, pixel: u32, offset: u32) -> usize {
        debug_assert!(offset != PASS_UNUSED);
        pixel as usize * self.pass_stride + offset as usize
    }
    pub fn add(&self, pixel: u32, offset: u32, v: f32) {
        self.data[self.index(pixel, offset)].fetch_add(v, Ordering::Relaxed);
    }
    pub fn add3(&self, pixel: u32, offset: u32, v: Rgb) {
        let i = self.index(pixel, offset);
        for c in 0..3 {
            self.data[i + c].fetch_add(v[c], Ordering::Relaxed);
        }
    }
    pub fn add4(&self, pixel: u32, offset: u32, v: Rgb, w: f32) {
        self.add3(pixel, offset, v);
        self.data[self.index(pixel, offset) + 3].fetch_add(w, Ordering::Relaxed);
    }
    pub fn fetch_add_uint(&self, pixel: u32, offset: u32, v: u32) -> u32 {
        self.data[self.index(pixel, offset)].fetch_add_uint(v, Ordering::Relaxed)
    }
    pub fn load_uint(&self, pixel: u32, offset: u32) -> u32 {
        self.data[self.index(pixel, offset)].load_uint(Ordering::Relaxed)
    }
    pub fn load(&self, pixel: u32, offset: u32) -> f32 {
        self.data[self.index(pixel, offset)].load(Ordering::Relaxed)
    }
    pub fn load3(&self, pixel: u32, offset: u32) -> Rgb {
        let i = self.index(pixel, offset);
        Rgb::new(vec3(
            self.data[i].load(Ordering::Relaxed),
            self.data[i + 1].load(Ordering::Relaxed),
            self.data[i + 2].load(Ordering::Relaxed),
        ))
    }
    pub fn store(&self, pixel: u32, offset: u32, v: f32) {
        self.data[self.index(pixel, offset)].store(v, Ordering::Relaxed);
    }
    pub fn store3(&self, pixel: u32, offset: u32, v: Vec3) {
        let i = self.index(pixel, offset);
        for c in 0..3 {
            self.data[i + c].store(v[c], Ordering::Relaxed);
        }
    }
    /// Writes the pass at `offset` as RGB, each pixel multiplied by `scale(pixel)`.
    pub fn write_exr<F: Fn(u32) -> f32 + Sync>(
        &self,
        path: &str,
        offset: u32,
        scale: F,
    ) -> exr::error::UnitResult {
        exr::prelude::write_rgba_file(
            path,
            self.width as usize,
            self.height as usize,
            |x, y| {
                let pixel = (x + y * self.width as usize) as u32;
                let v = self.load3(pixel, offset) * scale(pixel);
                (v[0], v[1], v[2], 1.0)
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn test_pass_offsets() {
        let film = FilmPasses::new(
            &[PassType::Combined, PassType::SampleCount, PassType::Ao, PassType::Combined],
            2,
        );
        assert_eq!(film.combined, 0);
        assert_eq!(film.sample_count, 4);
        assert_eq!(film.ao, 5);
        assert_eq!(film.lightgroup, 8);
        assert_eq!(film.pass_stride, 14);
        assert_eq!(film.shadow_catcher, PASS_UNUSED);
        assert!(!film.is_active(PassType::Emission));
    }
    #[test]
    fn test_buffer_add() {
        let buffer = RenderBuffer::new(2, 2, 4);
        buffer.add4(3, 0, Rgb::new(vec3(1.0, 2.0, 3.0)), 0.5);
        buffer.add3(3, 0, Rgb::new(vec3(1.0, 1.0, 1.0)));
        assert_eq!(buffer.load3(3, 0), Rgb::new(vec3(2.0, 3.0, 4.0)));
        assert_eq!(buffer.load(3, 3), 0.5);
        assert_eq!(buffer.load(0, 0), 0.0);
    }
}
