pub mod adaptive_sampling;
pub mod config;
pub mod driver;
pub mod init_from_bake;
pub mod init_from_camera;
pub mod intersect_closest;
pub mod intersect_shadow;
pub mod intersect_volume_stack;
pub mod kernel;
pub mod light_passes;
pub mod null_scattering;
pub mod path_state;
pub mod shade_background;
pub mod shade_light;
pub mod shade_shadow;
pub mod shade_surface;
pub mod shade_volume;
pub mod shadow_catcher;
pub mod state;
pub mod volume_stack;

#[cfg(test)]
pub(crate) mod testing;

pub use config::*;
pub use driver::{RenderStats, WavefrontIntegrator};
pub use kernel::{DeviceKernel, KernelGlobals};
pub use path_state::RngState;
pub use state::*;

use wavepath_core::bsdf::*;
use wavepath_core::pattern::*;
use wavepath_core::scene::*;
use wavepath_core::*;
