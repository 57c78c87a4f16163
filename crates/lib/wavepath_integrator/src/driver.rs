//! CPU reference scheduler: one queue per kernel, the largest queue runs next.
use crate::adaptive_sampling::adaptive_sampling_update;
use crate::init_from_bake::integrator_init_from_bake;
use crate::init_from_camera::integrator_init_from_camera;
use crate::kernel::{run_path_kernel, run_shadow_kernel};
use crate::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use wavepath_core::util::{create_progress_bar, parallel_for};

const KERNEL_CHUNK_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Sample passes run over the tile, fewer than requested if adaptive sampling stopped early.
    pub samples: u32,
    pub paths: usize,
    pub shadow_paths: usize,
    pub kernel_launches: usize,
}

pub struct WavefrontIntegrator {
    data: KernelData,
}

impl WavefrontIntegrator {
    pub fn new(config: &IntegratorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            data: KernelData::new(config)?,
        })
    }
    pub fn kernel_data(&self) -> &KernelData {
        &self.data
    }
    pub fn create_render_buffer(&self, width: u32, height: u32) -> RenderBuffer {
        RenderBuffer::new(width, height, self.data.film.pass_stride)
    }

    fn seed_path<S: SceneServices>(&self, kg: &KernelGlobals<S>, tile: &WorkTile, index: usize, sample: u32) -> bool {
        let x = tile.x + (index % tile.w as usize) as u32;
        let y = tile.y + (index / tile.w as usize) as u32;
        let mut state = IntegratorState::default();
        if self.data.integrator.is_baking() {
            integrator_init_from_bake(kg, &mut state, tile, x, y, sample);
        } else {
            integrator_init_from_camera(kg, &mut state, tile, x, y, sample);
        }
        if state.is_terminated() {
            return false;
        }
        kg.spawn_path(state).is_some()
    }

    /// Shadow kernels first so the shadow arena drains, otherwise the fullest main queue.
    fn next_batch<S: SceneServices>(&self, kg: &KernelGlobals<S>) -> Option<(DeviceKernel, Vec<StateHandle>)> {
        for kernel in [DeviceKernel::IntersectShadow, DeviceKernel::ShadeShadow] {
            let handles = kg.shadows.handles(|s| s.queued_kernel == Some(kernel));
            if !handles.is_empty() {
                return Some((kernel, handles));
            }
        }
        let mut queues: Vec<Vec<StateHandle>> = vec![vec![]; DeviceKernel::ALL.len()];
        for handle in kg.paths.handles(|_| true) {
            if let Some(Some(kernel)) = kg.paths.with(handle, |s| s.path.queued_kernel) {
                queues[kernel.index()].push(handle);
            }
        }
        DeviceKernel::ALL
            .iter()
            .zip(queues)
            .filter(|(_, q)| !q.is_empty())
            .max_by_key(|(_, q)| q.len())
            .map(|(k, q)| (*k, q))
    }

    fn run_batch<S: SceneServices>(&self, kg: &KernelGlobals<S>, kernel: DeviceKernel, handles: &[StateHandle]) {
        if kernel.is_shadow() {
            parallel_for(handles.len(), KERNEL_CHUNK_SIZE, |i| {
                let handle = handles[i];
                let done = kg
                    .shadows
                    .with(handle, |shadow| {
                        run_shadow_kernel(kg, kernel, shadow);
                        shadow.queued_kernel.is_none()
                    })
                    .unwrap_or(false);
                if done {
                    kg.shadows.release(handle);
                }
            });
        } else {
            parallel_for(handles.len(), KERNEL_CHUNK_SIZE, |i| {
                let handle = handles[i];
                let done = kg
                    .paths
                    .with(handle, |state| {
                        run_path_kernel(kg, kernel, state);
                        state.is_terminated()
                    })
                    .unwrap_or(false);
                if done {
                    kg.paths.release(handle);
                }
            });
        }
    }

    /// Renders `tile.num_samples` samples of every pixel of the tile into `buffer`.
    pub fn render<S: SceneServices>(&self, scene: &S, tile: &WorkTile, buffer: &RenderBuffer) -> RenderStats {
        let config = &self.data.integrator;
        let wavefront_size = config.wavefront_size;
        // catcher splits need room for the clone
        let path_capacity = if self.data.has(KernelFeatures::SHADOW_CATCHER) {
            wavefront_size * 2
        } else {
            wavefront_size
        };
        let paths = StateArena::new(path_capacity);
        let shadows = StateArena::new(path_capacity * 2);
        let kg = KernelGlobals {
            data: &self.data,
            scene,
            render_buffer: buffer,
            paths: &paths,
            shadows: &shadows,
        };

        let num_pixels = tile.num_pixels();
        log::info!(
            "rendering {}x{} tile, samples {}..{}, wavefront size {}",
            tile.w,
            tile.h,
            tile.start_sample,
            tile.start_sample + tile.num_samples,
            wavefront_size
        );
        let now = Instant::now();
        let progress = create_progress_bar(tile.num_samples as usize, "spp");
        let mut stats = RenderStats::default();
        let launched = AtomicUsize::new(0);

        for sample in tile.start_sample..tile.start_sample + tile.num_samples {
            let mut next_pixel = 0;
            loop {
                if next_pixel < num_pixels {
                    let budget = wavefront_size.saturating_sub(paths.num_live());
                    let count = budget.min(num_pixels - next_pixel);
                    let start = next_pixel;
                    parallel_for(count, KERNEL_CHUNK_SIZE, |i| {
                        if self.seed_path(&kg, tile, start + i, sample) {
                            launched.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                    next_pixel += count;
                }
                let live_shadows = shadows.num_live();
                let Some((kernel, handles)) = self.next_batch(&kg) else {
                    if next_pixel >= num_pixels {
                        break;
                    }
                    continue;
                };
                log::debug!(
                    "sample {}: {:?} on {} paths ({} live, {} shadow)",
                    sample,
                    kernel,
                    handles.len(),
                    paths.num_live(),
                    live_shadows
                );
                self.run_batch(&kg, kernel, &handles);
                stats.kernel_launches += 1;
                if kernel == DeviceKernel::IntersectShadow {
                    stats.shadow_paths += handles.len();
                }
            }
            debug_assert_eq!(paths.num_live(), 0);
            debug_assert_eq!(shadows.num_live(), 0);
            stats.samples += 1;
            progress.inc(1);

            if self.data.has(KernelFeatures::ADAPTIVE_SAMPLING)
                && stats.samples >= config.adaptive_min_samples.max(1)
            {
                let num_active = adaptive_sampling_update(&self.data, buffer, tile, false);
                log::debug!("adaptive sampling: {} of {} pixels active", num_active, num_pixels);
                if num_active == 0 {
                    log::info!("all pixels converged after {} samples", stats.samples);
                    break;
                }
            }
        }
        progress.finish();
        stats.paths = launched.load(Ordering::Relaxed);
        log::info!(
            "rendered {} samples, {} paths, {} kernel launches in {:.2}s",
            stats.samples,
            stats.paths,
            stats.kernel_launches,
            now.elapsed().as_secs_f64()
        );
        stats
    }
}
