use crate::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use wavepath_common::serde_json;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{name}`: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("pass `{0:?}` is required by the current configuration")]
    MissingPass(PassType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    pub object_index: u32,
    pub tri_offset: u32,
    pub use_camera: bool,
}
impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            object_index: 0,
            tri_offset: 0,
            use_camera: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub max_bounce: u32,
    pub max_diffuse_bounce: u32,
    pub max_glossy_bounce: u32,
    pub max_transmission_bounce: u32,
    pub max_volume_bounce: u32,
    pub transparent_max_bounce: u32,
    pub min_bounce: u32,
    pub transparent_min_bounce: u32,
    pub ao_bounces: u32,
    pub ao_bounces_distance: f32,
    /// Scales background light seen by rays past the AO bounces.
    pub ao_bounces_factor: f32,
    /// Limits on the sum of a contribution, 0 disables.
    pub sample_clamp_direct: f32,
    pub sample_clamp_indirect: f32,
    pub use_caustics: bool,
    pub sampling_pattern: SamplingPattern,
    pub seed: u32,
    pub use_shadow_catcher: bool,
    /// Fixed step ray marching instead of null scattering for heterogeneous media.
    pub volume_ray_marching: bool,
    pub volume_max_steps: u32,
    pub volume_step_rate: f32,
    pub use_light_mis: bool,
    pub use_direct_light: bool,
    /// Inverse of the contribution below which light samples are terminated stochastically.
    pub light_inv_rr_threshold: f32,
    pub use_light_passes: bool,
    pub use_denoising_features: bool,
    /// Baking without direct light: skips light sampling on the first bounce.
    pub filter_direct_light: bool,
    pub background_transparent: bool,
    pub adaptive_threshold: f32,
    pub adaptive_min_samples: u32,
    pub passes: Vec<PassType>,
    pub num_lightgroups: u32,
    pub bake: Option<BakeConfig>,
    pub wavefront_size: usize,
    pub spp: u32,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            max_bounce: 12,
            max_diffuse_bounce: 4,
            max_glossy_bounce: 4,
            max_transmission_bounce: 12,
            max_volume_bounce: 0,
            transparent_max_bounce: 8,
            min_bounce: 0,
            transparent_min_bounce: 0,
            ao_bounces: 0,
            ao_bounces_distance: f32::MAX,
            ao_bounces_factor: 1.0,
            sample_clamp_direct: 0.0,
            sample_clamp_indirect: 10.0,
            use_caustics: false,
            sampling_pattern: SamplingPattern::default(),
            seed: 0,
            use_shadow_catcher: false,
            volume_ray_marching: false,
            volume_max_steps: 1024,
            volume_step_rate: 1.0,
            use_light_mis: true,
            use_direct_light: true,
            light_inv_rr_threshold: 0.0,
            use_light_passes: false,
            use_denoising_features: false,
            filter_direct_light: false,
            background_transparent: false,
            adaptive_threshold: 0.0,
            adaptive_min_samples: 0,
            passes: vec![PassType::Combined],
            num_lightgroups: 0,
            bake: None,
            wavefront_size: 1 << 16,
            spp: 16,
        }
    }
}

impl IntegratorConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
    pub fn is_baking(&self) -> bool {
        self.bake.is_some()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct KernelFeatures: u32 {
        const SHADOW_CATCHER = 1 << 0;
        const MNEE = 1 << 1;
        const LIGHT_PASSES = 1 << 2;
        const DENOISING = 1 << 3;
        const AO_PASS = 1 << 4;
        const ADAPTIVE_SAMPLING = 1 << 5;
        const BAKING = 1 << 6;
        /// Any pass besides combined and the bookkeeping passes.
        const PASSES = 1 << 7;
    }
}

/// Immutable data shared by every kernel invocation of a render.
pub struct KernelData {
    pub integrator: IntegratorConfig,
    pub film: FilmPasses,
    pub sampling: SamplingContext,
    pub features: KernelFeatures,
}

const LIGHT_PASSES: [PassType; 8] = [
    PassType::DiffuseDirect,
    PassType::DiffuseIndirect,
    PassType::GlossyDirect,
    PassType::GlossyIndirect,
    PassType::TransmissionDirect,
    PassType::TransmissionIndirect,
    PassType::VolumeDirect,
    PassType::VolumeIndirect,
];

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

fn check_non_negative(name: &'static str, v: f32) -> Result<(), ConfigError> {
    if v.is_nan() || v < 0.0 {
        return Err(invalid(name, format!("expected a non-negative number, got {}", v)));
    }
    Ok(())
}

impl KernelData {
    pub fn new(config: &IntegratorConfig) -> Result<Self, ConfigError> {
        if config.spp == 0 {
            return Err(invalid("spp", "at least one sample per pixel is required"));
        }
        if config.wavefront_size == 0 {
            return Err(invalid("wavefront_size", "must be positive"));
        }
        if config.volume_max_steps == 0 {
            return Err(invalid("volume_max_steps", "must be positive"));
        }
        if !(config.volume_step_rate > 0.0 && config.volume_step_rate.is_finite()) {
            return Err(invalid(
                "volume_step_rate",
                format!("expected a positive number, got {}", config.volume_step_rate),
            ));
        }
        if config.ao_bounces_distance.is_nan() || config.ao_bounces_distance <= 0.0 {
            return Err(invalid("ao_bounces_distance", "must be positive"));
        }
        check_non_negative("ao_bounces_factor", config.ao_bounces_factor)?;
        check_non_negative("sample_clamp_direct", config.sample_clamp_direct)?;
        check_non_negative("sample_clamp_indirect", config.sample_clamp_indirect)?;
        check_non_negative("light_inv_rr_threshold", config.light_inv_rr_threshold)?;
        check_non_negative("adaptive_threshold", config.adaptive_threshold)?;
        if config.is_baking() && config.use_shadow_catcher {
            return Err(invalid("use_shadow_catcher", "shadow catchers are not supported when baking"));
        }

        let mut passes = config.passes.clone();
        if !passes.contains(&PassType::Combined) {
            passes.insert(0, PassType::Combined);
        }
        let require = |pass: PassType| -> Result<(), ConfigError> {
            if config.passes.contains(&pass) {
                Ok(())
            } else {
                Err(ConfigError::MissingPass(pass))
            }
        };
        let mut features = KernelFeatures::empty();
        if config.adaptive_threshold > 0.0 {
            require(PassType::AdaptiveAuxBuffer)?;
            require(PassType::SampleCount)?;
            features |= KernelFeatures::ADAPTIVE_SAMPLING;
        }
        if config.is_baking() {
            require(PassType::BakePrimitive)?;
            require(PassType::BakeDifferential)?;
            features |= KernelFeatures::BAKING;
        }
        if config.use_shadow_catcher {
            require(PassType::ShadowCatcher)?;
            passes.push(PassType::ShadowCatcherSampleCount);
            passes.push(PassType::ShadowCatcherMatte);
            features |= KernelFeatures::SHADOW_CATCHER;
        }
        if config.use_denoising_features {
            passes.push(PassType::DenoisingAlbedo);
            features |= KernelFeatures::DENOISING;
        }
        if config.use_light_passes {
            passes.extend_from_slice(&LIGHT_PASSES);
        }
        if config.use_caustics {
            features |= KernelFeatures::MNEE;
        }

        let film = FilmPasses::new(&passes, config.num_lightgroups);
        if LIGHT_PASSES.iter().any(|p| film.is_active(*p)) {
            features |= KernelFeatures::LIGHT_PASSES;
        }
        if film.is_active(PassType::Ao) {
            features |= KernelFeatures::AO_PASS;
        }
        let writes_passes = passes.iter().any(|p| {
            !matches!(
                p,
                PassType::Combined
                    | PassType::SampleCount
                    | PassType::AdaptiveAuxBuffer
                    | PassType::BakePrimitive
                    | PassType::BakeDifferential
            )
        });
        if writes_passes || config.num_lightgroups > 0 {
            features |= KernelFeatures::PASSES;
        }
        if config.sample_clamp_indirect > 0.0 && config.sample_clamp_indirect < 1e-3 {
            log::warn!(
                "sample_clamp_indirect = {} will clamp almost all indirect light",
                config.sample_clamp_indirect
            );
        }
        log::debug!(
            "kernel features {:?}, pass stride {}",
            features,
            film.pass_stride
        );
        Ok(Self {
            integrator: config.clone(),
            sampling: SamplingContext::new(config.sampling_pattern, config.seed, config.spp),
            film,
            features,
        })
    }
    pub fn has(&self, feature: KernelFeatures) -> bool {
        self.features.contains(feature)
    }
}
