use wavepath_common::indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use wavepath_common::*;

/// `f32` with lock-free accumulation, bit-compatible with a `u32` counter.
pub struct AtomicFloat {
    bits: AtomicU32,
}
impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}
impl AtomicFloat {
    pub fn new(v: f32) -> Self {
        Self {
            bits: AtomicU32::new(bytemuck::cast(v)),
        }
    }
    pub fn load(&self, ordering: Ordering) -> f32 {
        bytemuck::cast(self.bits.load(ordering))
    }
    pub fn store(&self, v: f32, ordering: Ordering) {
        self.bits.store(bytemuck::cast(v), ordering)
    }
    pub fn fetch_add(&self, v: f32, ordering: Ordering) -> f32 {
        let mut old = self.bits.load(Ordering::Relaxed);
        loop {
            let new: u32 = bytemuck::cast(bytemuck::cast::<u32, f32>(old) + v);
            match self
                .bits
                .compare_exchange_weak(old, new, ordering, Ordering::Relaxed)
            {
                Ok(_) => return bytemuck::cast(old),
                Err(x) => old = x,
            }
        }
    }
    /// Treats the slot as an integer counter.
    pub fn fetch_add_uint(&self, v: u32, ordering: Ordering) -> u32 {
        self.bits.fetch_add(v, ordering)
    }
    pub fn load_uint(&self, ordering: Ordering) -> u32 {
        self.bits.load(ordering)
    }
}
impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        Self {
            bits: AtomicU32::new(self.bits.load(Ordering::Relaxed)),
        }
    }
}

/// Runs `f` over `0..count` on the rayon pool, handing out `chunk_size` indices at a time.
pub fn parallel_for<F: Fn(usize) + Sync>(count: usize, chunk_size: usize, f: F) {
    let chunk_size = chunk_size.max(1);
    let nthreads = rayon::current_num_threads().min((count + chunk_size - 1) / chunk_size);
    let work_counter = AtomicUsize::new(0);
    rayon::scope(|s| {
        for _ in 0..nthreads {
            s.spawn(|_| loop {
                let work = work_counter.fetch_add(chunk_size, Ordering::Relaxed);
                if work >= count {
                    return;
                }
                for i in work..(work + chunk_size).min(count) {
                    f(i);
                }
            });
        }
    });
}

pub struct ProgressBarWrapper {
    inner: Option<ProgressBar>,
}
impl ProgressBarWrapper {
    pub fn inc(&self, delta: u64) {
        if let Some(pb) = &self.inner {
            pb.inc(delta);
        }
    }
    pub fn finish(&self) {
        if let Some(pb) = &self.inner {
            pb.finish();
        }
    }
}

static PB_ENABLE: AtomicBool = AtomicBool::new(true);
pub fn enable_progress_bar(enable: bool) {
    PB_ENABLE.store(enable, Ordering::Relaxed);
}
pub fn create_progress_bar(count: usize, what: &str) -> ProgressBarWrapper {
    if !PB_ENABLE.load(Ordering::Relaxed) {
        return ProgressBarWrapper { inner: None };
    }
    let template = format!(
        "[{{elapsed_precise}} - {{eta_precise}}] [{{bar:40.cyan/blue}}] {{pos:>7}}/{{len:7}}{} {{msg}}",
        what
    );
    let style = match ProgressStyle::default_bar().template(&template) {
        Ok(style) => style.progress_chars("=>-"),
        Err(err) => {
            log::warn!("invalid progress bar template: {}", err);
            ProgressStyle::default_bar()
        }
    };
    let progress = ProgressBar::new(count as u64);
    progress.set_draw_target(ProgressDrawTarget::stdout_with_hz(2));
    progress.set_style(style);
    ProgressBarWrapper {
        inner: Some(progress),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn test_atomic_float_parallel_add() {
        let v = AtomicFloat::new(0.0);
        parallel_for(1000, 7, |_| {
            v.fetch_add(0.5, Ordering::Relaxed);
        });
        assert_eq!(v.load(Ordering::Relaxed), 500.0);
    }
    #[test]
    fn test_atomic_uint_counter() {
        let v = AtomicFloat::new(0.0);
        assert_eq!(v.fetch_add_uint(1, Ordering::Relaxed), 0);
        assert_eq!(v.fetch_add_uint(1, Ordering::Relaxed), 1);
        assert_eq!(v.load_uint(Ordering::Relaxed), 2);
    }
    #[test]
    fn test_parallel_for_visits_all() {
        let hits: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(100, 3, |i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }
    #[test]
    fn test_create_progress_bar_disabled() {
        enable_progress_bar(false);
        let progress = create_progress_bar(16, "spp");
        enable_progress_bar(true);
        assert!(progress.inner.is_none());
        progress.inc(1);
        progress.finish();
    }
}
