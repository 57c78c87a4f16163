use crate::hash::*;
use crate::*;
use wavepath_common::lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Sample dimensions. Camera dimensions are absolute, the rest are relative to the
/// per-bounce `rng_offset`.
pub mod dim {
    pub const FILTER: u32 = 0;
    pub const LENS_TIME: u32 = 1;

    pub const TERMINATE: u32 = 0;
    pub const LIGHT: u32 = 1;
    pub const LIGHT_TERMINATE: u32 = 2;
    pub const SURFACE_BSDF: u32 = 3;
    pub const SURFACE_AO: u32 = 4;
    pub const SURFACE_BEVEL: u32 = 5;

    pub const VOLUME_PHASE: u32 = 3;
    pub const VOLUME_COLOR_CHANNEL: u32 = 4;
    pub const VOLUME_SCATTER_DISTANCE: u32 = 5;
    pub const VOLUME_OFFSET: u32 = 6;
    pub const VOLUME_SHADE_OFFSET: u32 = 7;
    pub const VOLUME_RESERVOIR: u32 = 8;
    pub const VOLUME_EXPANSION_ORDER: u32 = 9;

    pub const BAKE_JITTER: u32 = 0;

    pub const BOUNCE_NUM: u32 = 16;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPattern {
    SobolBurley,
    TabulatedSobol,
}
impl Default for SamplingPattern {
    fn default() -> Self {
        SamplingPattern::SobolBurley
    }
}

const SOBOL_BITS: usize = 32;
const SOBOL_DIMENSIONS: usize = 4;
pub const NUM_TAB_SOBOL_PATTERNS: u32 = 32;
pub const MAX_TAB_SOBOL_SEQUENCE_SIZE: u32 = 1 << 14;

// (degree, coefficients, initial direction numbers) of dimensions 1..4
const SOBOL_POLYNOMIALS: [(usize, u32, &[u32]); SOBOL_DIMENSIONS - 1] =
    [(1, 0, &[1]), (2, 1, &[1, 3]), (3, 1, &[1, 3, 1])];

lazy_static! {
    /// Direction numbers stored bit-reversed, indexed by the bit of the sample index.
    static ref SOBOL_BURLEY_TABLE: [[u32; SOBOL_BITS]; SOBOL_DIMENSIONS] = {
        let mut table = [[0u32; SOBOL_BITS]; SOBOL_DIMENSIONS];
        for k in 0..SOBOL_BITS {
            table[0][k] = 1 << k;
        }
        for (d, (degree, a, m_init)) in SOBOL_POLYNOMIALS.iter().enumerate() {
            table[d + 1] = sobol_direction_numbers(*degree, *a, m_init);
        }
        table
    };
}

fn sobol_direction_numbers(degree: usize, a: u32, m_init: &[u32]) -> [u32; SOBOL_BITS] {
    let mut m = [0u32; SOBOL_BITS];
    for k in 0..SOBOL_BITS {
        m[k] = if k < degree {
            m_init[k]
        } else {
            let mut mk = m[k - degree] ^ (m[k - degree] << degree);
            for j in 1..degree {
                if (a >> (degree - 1 - j)) & 1 == 1 {
                    mk ^= m[k - j] << j;
                }
            }
            mk
        };
    }
    let mut v = [0u32; SOBOL_BITS];
    for k in 0..SOBOL_BITS {
        v[k] = (m[k] << (SOBOL_BITS - 1 - k)).reverse_bits();
    }
    v
}

/// Owen-scrambled Sobol point for a bit-reversed index.
fn sobol_burley(rev_bit_index: u32, dimension: usize, scramble_seed: u32) -> f32 {
    let mut result = 0u32;
    if dimension == 0 {
        result = rev_bit_index.reverse_bits();
    } else {
        let table = &SOBOL_BURLEY_TABLE[dimension];
        let mut index = rev_bit_index;
        let mut i = 0u32;
        while index != 0 {
            let j = index.leading_zeros();
            result ^= table[(i + j) as usize];
            i += j + 1;
            index <<= j;
            index <<= 1;
        }
    }
    let result = reversed_bit_owen(result, hash_wang_seeded_uint(dimension as u32, scramble_seed));
    uint_to_float_excl(result.reverse_bits())
}

fn shuffled_index(index: u32, seed: u32, mask: u32) -> u32 {
    reversed_bit_owen(index.reverse_bits(), seed) & mask
}

#[derive(Clone)]
pub struct SamplingContext {
    pub pattern: SamplingPattern,
    pub seed: u32,
    sobol_index_mask: u32,
    tabulated_sequence_size: u32,
    tabulated_table: Vec<f32>,
}

impl SamplingContext {
    /// `samples_per_pixel` bounds the sample index range used when shuffling.
    pub fn new(pattern: SamplingPattern, seed: u32, samples_per_pixel: u32) -> Self {
        let size = samples_per_pixel.max(1).next_power_of_two();
        let sobol_index_mask = (size - 1).reverse_bits();
        let mut ctx = Self {
            pattern,
            seed,
            sobol_index_mask,
            tabulated_sequence_size: 0,
            tabulated_table: vec![],
        };
        if pattern == SamplingPattern::TabulatedSobol {
            ctx.tabulated_sequence_size = size.min(MAX_TAB_SOBOL_SEQUENCE_SIZE);
            ctx.tabulated_table = Self::generate_tabulated_table(ctx.tabulated_sequence_size);
        }
        ctx
    }
    fn generate_tabulated_table(size: u32) -> Vec<f32> {
        let mut table = vec![0.0f32; (NUM_TAB_SOBOL_PATTERNS * size) as usize * SOBOL_DIMENSIONS];
        table
            .par_chunks_mut(size as usize * SOBOL_DIMENSIONS)
            .enumerate()
            .for_each(|(pattern, points)| {
                let seed = hash_hp_uint(pattern as u32 ^ 0x2f6bc9d1);
                for i in 0..size as usize {
                    let rev = (i as u32).reverse_bits();
                    for d in 0..SOBOL_DIMENSIONS {
                        points[i * SOBOL_DIMENSIONS + d] = sobol_burley(rev, d, seed);
                    }
                }
            });
        table
    }
    fn tabulated_point(&self, sample: u32, dimension: u32, seed: u32) -> &[f32] {
        let size = self.tabulated_sequence_size;
        let pattern_i = hash_shuffle_uint(dimension, NUM_TAB_SOBOL_PATTERNS, seed);
        let sample_i = hash_shuffle_uint(sample, size, dimension ^ seed);
        let index = (pattern_i * size + sample_i) as usize * SOBOL_DIMENSIONS;
        &self.tabulated_table[index..index + SOBOL_DIMENSIONS]
    }
    pub fn sample_1d(&self, hash: u32, sample: u32, dimension: u32) -> f32 {
        match self.pattern {
            SamplingPattern::SobolBurley => {
                let seed = hash ^ hash_hp_uint(dimension);
                let index = shuffled_index(sample, seed ^ 0xbff95bfe, self.sobol_index_mask);
                sobol_burley(index, 0, seed ^ 0x635c77bd)
            }
            SamplingPattern::TabulatedSobol => self.tabulated_point(sample, dimension, hash)[0],
        }
    }
    pub fn sample_2d(&self, hash: u32, sample: u32, dimension: u32) -> Vec2 {
        match self.pattern {
            SamplingPattern::SobolBurley => {
                let seed = hash ^ hash_hp_uint(dimension);
                let index = shuffled_index(sample, seed ^ 0xf8ade99a, self.sobol_index_mask);
                vec2(
                    sobol_burley(index, 0, seed ^ 0xe0aaaf76),
                    sobol_burley(index, 1, seed ^ 0x94964d4e),
                )
            }
            SamplingPattern::TabulatedSobol => {
                let p = self.tabulated_point(sample, dimension, hash);
                vec2(p[0], p[1])
            }
        }
    }
    pub fn sample_3d(&self, hash: u32, sample: u32, dimension: u32) -> Vec3 {
        match self.pattern {
            SamplingPattern::SobolBurley => {
                let seed = hash ^ hash_hp_uint(dimension);
                let index = shuffled_index(sample, seed ^ 0xcaa726ac, self.sobol_index_mask);
                vec3(
                    sobol_burley(index, 0, seed ^ 0x9e78e391),
                    sobol_burley(index, 1, seed ^ 0x67c33241),
                    sobol_burley(index, 2, seed ^ 0x78c395c5),
                )
            }
            SamplingPattern::TabulatedSobol => {
                let p = self.tabulated_point(sample, dimension, hash);
                vec3(p[0], p[1], p[2])
            }
        }
    }
    /// Per-pixel stream hash.
    pub fn hash_pixel(&self, x: u32, y: u32) -> u32 {
        hash_iqnt2d(x, y) ^ self.seed
    }
    /// Per-texel stream hash for baking.
    pub fn hash_bake_seed(&self, seed: u32) -> u32 {
        hash_uint(seed) ^ self.seed
    }
}

/// Splits samples into two classes of equal size, used by adaptive sampling to build the
/// half buffer.
pub fn sample_is_class_a(pattern: SamplingPattern, sample: u32) -> bool {
    match pattern {
        SamplingPattern::SobolBurley | SamplingPattern::TabulatedSobol => {
            (sample & 0xaaaaaaaa).count_ones() & 1 == 1
        }
    }
}
