// Integer hashes used for seeding and scrambling sample sequences.

/// Mixing function from Hash Prospector.
#[inline]
pub fn hash_hp_uint(mut i: u32) -> u32 {
    i ^= i >> 16;
    i = i.wrapping_mul(0x21f0aaad);
    i ^= i >> 15;
    i = i.wrapping_mul(0xd35a2d97);
    i ^= i >> 15;
    // keeps zero from mapping to zero
    i ^ 0xe6fe3beb
}

#[inline]
pub fn hash_hp_seeded_uint(i: u32, seed: u32) -> u32 {
    hash_hp_uint(i ^ hash_hp_uint(seed))
}

#[inline]
pub fn hash_wang_seeded_uint(i: u32, seed: u32) -> u32 {
    let mut i = i ^ seed;
    i = (i ^ 61) ^ (i >> 16);
    i = i.wrapping_mul(9);
    i ^= i >> 4;
    i = i.wrapping_mul(0x27d4eb2d);
    i ^ (i >> 15)
}

/// 2D spatial hash by Inigo Quilez.
#[inline]
pub fn hash_iqnt2d(x: u32, y: u32) -> u32 {
    let qx = 1103515245u32.wrapping_mul((x >> 1) ^ y);
    let qy = 1103515245u32.wrapping_mul((y >> 1) ^ x);
    1103515245u32.wrapping_mul(qx ^ (qy >> 3))
}

/// Bob Jenkins' lookup3 final mix, used to turn arbitrary seeds into hashes.
#[inline]
pub fn hash_uint(kx: u32) -> u32 {
    let init = 0xdeadbeefu32.wrapping_add(1 << 2).wrapping_add(13);
    let mut a = init.wrapping_add(kx);
    let mut b = init;
    let mut c = init;
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

/// Laine-Karras style scramble operating on bit-reversed integers, so every bit only
/// depends on the bits below it in the reversed representation.
#[inline]
pub fn reversed_bit_owen(mut n: u32, seed: u32) -> u32 {
    n ^= n.wrapping_mul(0x3d20adea);
    n = n.wrapping_add(seed);
    n = n.wrapping_mul((seed >> 16) | 1);
    n ^= n.wrapping_mul(0x05526c56);
    n ^= n.wrapping_mul(0x53a22864);
    n
}

/// Seeded permutation of `0..length` (Kensler's permute).
pub fn hash_shuffle_uint(i: u32, length: u32, seed: u32) -> u32 {
    debug_assert!(length > 0);
    let mut i = i % length;
    let bits = 32 - (length - 1).leading_zeros();
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    loop {
        i ^= seed;
        i = i.wrapping_mul(0xe170893d);
        i ^= seed >> 16;
        i ^= (i & mask) >> 4;
        i ^= seed >> 8;
        i = i.wrapping_mul(0x0929eb3f);
        i ^= seed >> 23;
        i ^= (i & mask) >> 1;
        i = i.wrapping_mul(1 | (seed >> 27));
        i = i.wrapping_mul(0x6935fa69);
        i ^= (i & mask) >> 11;
        i = i.wrapping_mul(0x74dcb303);
        i ^= (i & mask) >> 2;
        i = i.wrapping_mul(0x9e501cc3);
        i ^= (i & mask) >> 2;
        i = i.wrapping_mul(0xc860a3df);
        i &= mask;
        i ^= i >> 5;
        if i < length {
            break;
        }
    }
    i.wrapping_add(seed) % length
}

/// Maps the full `u32` range to `[0, 1)`.
#[inline]
pub fn uint_to_float_excl(n: u32) -> f32 {
    // 24 bits of mantissa keep 1.0 out of reach
    (n >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
}
