// vim: tw=80

//! Reed-Solomon erasure coding primitives over GF(2^8).
//!
//! This is a pure-Rust reimplementation of the handful of `isa-l` entry
//! points that `ft_array::codec::Codec` is built on: Cauchy matrix
//! generation, Gauss-Jordan matrix inversion, and table-driven
//! multiply-accumulate encoding. The function names and call sequence
//! intentionally mirror `isa-l`'s C API so that the matrix math in
//! `ft_array::codec` reads the same regardless of which backend computes
//! it.
//!
//! All arithmetic uses the field GF(2^8) with the primitive polynomial
//! `0x11d`. Addition is XOR; multiplication is defined via precomputed
//! log/antilog tables so it stays branch-free past table construction.

use std::sync::OnceLock;

/// The field's reducing polynomial. Fixed: changing it would silently
/// change every encoded parity byte ever written.
const PRIM_POLY: u16 = 0x11d;

struct Tables {
    exp: [u8; 512],
    log: [u8; 256],
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIM_POLY;
            }
        }
        // Duplicate the table so `exp[log(a) + log(b)]` never needs a
        // modulo when log(a) + log(b) < 510.
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Tables { exp, log }
    })
}

/// Multiply two field elements.
pub fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let s = t.log[a as usize] as usize + t.log[b as usize] as usize;
    t.exp[s]
}

/// Multiplicative inverse of a nonzero field element.
pub fn gf_inv(a: u8) -> u8 {
    assert_ne!(a, 0, "0 has no multiplicative inverse in GF(2^8)");
    let t = tables();
    t.exp[255 - t.log[a as usize] as usize]
}

/// Generate an `m`-by-`k` Cauchy matrix over GF(2^8): the top `k` rows are
/// the identity matrix, and every remaining row `i` (`k <= i < m`) holds
/// `1 / (i ^ j)` in column `j`. Any `k`-row submatrix of a Cauchy matrix
/// built this way is invertible, because its rows are evaluations of
/// distinct points of a Cauchy kernel.
pub fn gf_gen_cauchy_matrix(m: usize, k: usize) -> Vec<u8> {
    assert!(k <= m, "a Cauchy matrix needs at least as many rows as columns");
    let mut mat = vec![0u8; m * k];
    for i in 0..k {
        mat[k * i + i] = 1;
    }
    for i in k..m {
        for j in 0..k {
            mat[k * i + j] = gf_inv((i ^ j) as u8);
        }
    }
    mat
}

/// Invert an `n`-by-`n` matrix over GF(2^8) via Gauss-Jordan elimination
/// with partial pivoting. Returns `None` if the matrix is singular.
pub fn gf_invert_matrix(matrix: &[u8], n: usize) -> Option<Vec<u8>> {
    assert_eq!(matrix.len(), n * n);
    // Augment [matrix | identity] and reduce the left half to identity.
    let mut aug = vec![0u8; n * 2 * n];
    for i in 0..n {
        aug[2 * n * i..2 * n * i + n].copy_from_slice(&matrix[n * i..n * i + n]);
        aug[2 * n * i + n + i] = 1;
    }
    for col in 0..n {
        let pivot_row = (col..n).find(|&r| aug[2 * n * r + col] != 0)?;
        if pivot_row != col {
            for c in 0..2 * n {
                aug.swap(2 * n * col + c, 2 * n * pivot_row + c);
            }
        }
        let inv = gf_inv(aug[2 * n * col + col]);
        for c in 0..2 * n {
            aug[2 * n * col + c] = gf_mul(aug[2 * n * col + c], inv);
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[2 * n * row + col];
            if factor == 0 {
                continue;
            }
            for c in 0..2 * n {
                let v = gf_mul(factor, aug[2 * n * col + c]);
                aug[2 * n * row + c] ^= v;
            }
        }
    }
    let mut out = vec![0u8; n * n];
    for i in 0..n {
        out[n * i..n * i + n].copy_from_slice(&aug[2 * n * i + n..2 * n * i + 2 * n]);
    }
    Some(out)
}

/// Byte size of one coefficient's multiply table.
pub const TABLE_BYTES_PER_COEFF: usize = 32;

/// Build the 32-byte-per-coefficient multiply tables used by
/// [`ec_encode_data`]: for each of `rows` output rows and `k` input
/// columns, `coeffs[row * k + col]` is expanded into a pair of 16-entry
/// nibble tables such that `gf_mul(byte, coeff)` equals
/// `table[byte & 0xf] ^ table[16 + (byte >> 4)]`. This is the same
/// decomposition `isa-l`'s SSE/AVX encoders use to turn a GF multiply into
/// two table lookups and an XOR; here it's consumed by a scalar loop
/// rather than SIMD, but the table layout is identical so the matrix math
/// upstream doesn't need to know the difference.
pub fn ec_init_tables(k: usize, rows: usize, coeffs: &[u8]) -> Vec<u8> {
    assert_eq!(coeffs.len(), k * rows);
    let mut tables = vec![0u8; rows * k * TABLE_BYTES_PER_COEFF];
    for (idx, &coeff) in coeffs.iter().enumerate() {
        let base = idx * TABLE_BYTES_PER_COEFF;
        for j in 0..16u8 {
            tables[base + j as usize] = gf_mul(j, coeff);
            tables[base + 16 + j as usize] = gf_mul(j << 4, coeff);
        }
    }
    tables
}

/// Encode (or decode) `rows` output chunks of `len` bytes each from `k`
/// input chunks, using tables built by [`ec_init_tables`]. Each output row
/// `r` is `Σ_c coeffs[r,c] ⊗ sources[c]`, with `⊗`/`Σ` being GF(2^8)
/// multiply/XOR.
pub fn ec_encode_data(
    len: usize,
    k: usize,
    rows: usize,
    tables: &[u8],
    sources: &[&[u8]],
    dests: &mut [&mut [u8]],
) {
    assert_eq!(sources.len(), k);
    assert_eq!(dests.len(), rows);
    assert_eq!(tables.len(), rows * k * TABLE_BYTES_PER_COEFF);
    for r in 0..rows {
        for byte in dests[r].iter_mut() {
            *byte = 0;
        }
        for c in 0..k {
            let base = (r * k + c) * TABLE_BYTES_PER_COEFF;
            let low = &tables[base..base + 16];
            let high = &tables[base + 16..base + 32];
            let src = sources[c];
            for i in 0..len {
                let b = src[i];
                dests[r][i] ^= low[(b & 0xf) as usize] ^ high[(b >> 4) as usize];
            }
        }
    }
}
