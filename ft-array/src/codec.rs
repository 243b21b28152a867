// vim: tw=80

//! The erasure codec: one Cauchy matrix shared by every stripe of a given
//! geometry, used both to compute parity on write and to recover missing
//! chunks on rebuild.
//!
//! Grounded in the matrix bookkeeping of `isa-l`-style codecs (generate the
//! full `(data+parity)`-by-`data` matrix once, slice out submatrices per
//! operation) and in the P/Q recovery math of a classic RAID6 rebuild:
//! recovering a data chunk is "solve for the erased columns of the
//! surviving-rows submatrix", and recovering a parity chunk is just
//! re-encoding from recovered (or still-present) data.

use ft_gf256::{ec_encode_data, ec_init_tables, gf_invert_matrix, gf_gen_cauchy_matrix, gf_mul};

use crate::error::Error;
use crate::Result;

/// A fixed `(data_cnt + parity_cnt)`-by-`data_cnt` Cauchy matrix and the
/// multiply tables derived from its parity rows. One `Codec` is built per
/// distinct `(data_cnt, parity_cnt)` pair and reused across every stripe
/// with that geometry — RAID6 always calls this with `parity_cnt == 2`.
pub struct Codec {
    data_cnt: usize,
    parity_cnt: usize,
    matrix: Vec<u8>,
    encode_tables: Vec<u8>,
}

impl Codec {
    pub fn new(data_cnt: usize, parity_cnt: usize) -> Self {
        assert!(data_cnt > 0, "a codec needs at least one data chunk");
        let m = data_cnt + parity_cnt;
        let matrix = gf_gen_cauchy_matrix(m, data_cnt);
        let encode_tables =
            ec_init_tables(data_cnt, parity_cnt, &matrix[data_cnt * data_cnt..]);
        Codec { data_cnt, parity_cnt, matrix, encode_tables }
    }

    pub fn data_count(&self) -> usize {
        self.data_cnt
    }

    pub fn parity_count(&self) -> usize {
        self.parity_cnt
    }

    /// Compute every parity chunk from a full set of data chunks. `sources`
    /// must hold exactly `data_cnt` buffers of equal length; `dests` must
    /// hold exactly `parity_cnt` buffers of that same length, in parity
    /// order (P first, then Q, ...).
    pub fn encode(&self, sources: &[&[u8]], dests: &mut [&mut [u8]]) {
        assert_eq!(sources.len(), self.data_cnt);
        assert_eq!(dests.len(), self.parity_cnt);
        let len = sources[0].len();
        ec_encode_data(len, self.data_cnt, self.parity_cnt, &self.encode_tables, sources, dests);
    }

    /// Recover one or more missing chunks from exactly `data_cnt` surviving
    /// chunks (a mix of data and parity is fine, as long as the resulting
    /// rows form an invertible submatrix — which any `data_cnt` distinct
    /// rows of a Cauchy matrix do).
    ///
    /// `survivor_idx[i]` is the stripe-wide chunk index (0-based, data
    /// chunks first then parity chunks) that `survivors[i]` holds.
    /// `missing` lists the stripe-wide chunk indices to reconstruct, and
    /// `dests` provides one destination buffer per entry of `missing`, in
    /// the same order — never a single buffer shared across requested
    /// indices, so a caller recovering two chunks always gets two
    /// independent outputs.
    pub fn rebuild(
        &self,
        survivor_idx: &[usize],
        survivors: &[&[u8]],
        missing: &[usize],
        dests: &mut [&mut [u8]],
    ) -> Result<()> {
        assert_eq!(survivor_idx.len(), self.data_cnt);
        assert_eq!(survivors.len(), self.data_cnt);
        assert_eq!(missing.len(), dests.len());
        if missing.is_empty() {
            return Ok(());
        }

        let k = self.data_cnt;
        let mut sub = vec![0u8; k * k];
        for (row, &chunk_idx) in survivor_idx.iter().enumerate() {
            sub[k * row..k * row + k]
                .copy_from_slice(&self.matrix[k * chunk_idx..k * chunk_idx + k]);
        }
        let inv = gf_invert_matrix(&sub, k).ok_or(Error::RebuildRecoverError)?;

        let coeffs = self.decode_coefficients(&inv, missing);
        let dec_tables = ec_init_tables(k, missing.len(), &coeffs);
        let len = survivors[0].len();
        ec_encode_data(len, k, missing.len(), &dec_tables, survivors, dests);
        Ok(())
    }

    /// One row of decode coefficients per requested `missing` index. A
    /// missing data chunk is recovered directly from the corresponding row
    /// of the inverted submatrix (inverting `sub * data == survivors` gives
    /// `data == inv * survivors`). A missing parity chunk has no row of its
    /// own in `inv`: it's recovered by first expressing the original data
    /// in terms of the survivors (same `inv`), then re-applying that
    /// parity's row of the full generator matrix — i.e. `mat_row(parity) *
    /// inv`, composing the two linear maps into one coefficient row so a
    /// single `ec_encode_data` pass produces it straight from survivors.
    fn decode_coefficients(&self, inv: &[u8], missing: &[usize]) -> Vec<u8> {
        let k = self.data_cnt;
        let mut coeffs = Vec::with_capacity(missing.len() * k);
        for &idx in missing {
            if idx < k {
                coeffs.extend_from_slice(&inv[k * idx..k * idx + k]);
            } else {
                let mat_row = &self.matrix[k * idx..k * idx + k];
                for col in 0..k {
                    let mut acc = 0u8;
                    for t in 0..k {
                        acc ^= gf_mul(mat_row[t], inv[k * t + col]);
                    }
                    coeffs.push(acc);
                }
            }
        }
        coeffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    fn random_chunks(count: usize, len: usize) -> Vec<Vec<u8>> {
        let mut rng = XorShiftRng::from_seed([0x42; 16]);
        (0..count).map(|_| (0..len).map(|_| rng.gen()).collect()).collect()
    }

    #[test]
    fn encode_produces_requested_parity_count() {
        let codec = Codec::new(4, 2);
        let data = random_chunks(4, 32);
        let data_refs: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let mut p = vec![0u8; 32];
        let mut q = vec![0u8; 32];
        let mut dests: Vec<&mut [u8]> = vec![&mut p, &mut q];
        codec.encode(&data_refs, &mut dests);
        assert!(p.iter().any(|&b| b != 0) || data.iter().all(|c| c.iter().all(|&b| b == 0)));
    }

    #[test]
    fn rebuild_recovers_single_missing_data_chunk() {
        let (k, pc) = (4usize, 2usize);
        let codec = Codec::new(k, pc);
        let data = random_chunks(k, 64);
        let data_refs: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let mut p = vec![0u8; 64];
        let mut q = vec![0u8; 64];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut p, &mut q];
            codec.encode(&data_refs, &mut dests);
        }

        // Chunk 1 (data) is missing; recover it from chunks 0, 2, 3, P.
        let survivor_idx = [0usize, 2, 3, 4];
        let survivors: Vec<&[u8]> =
            vec![data[0].as_slice(), data[2].as_slice(), data[3].as_slice(), p.as_slice()];
        let mut rebuilt = vec![0u8; 64];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut rebuilt];
            codec.rebuild(&survivor_idx, &survivors, &[1], &mut dests).unwrap();
        }
        assert_eq!(rebuilt, data[1]);
    }

    #[test]
    fn rebuild_recovers_two_missing_chunks_into_independent_buffers() {
        let (k, pc) = (4usize, 2usize);
        let codec = Codec::new(k, pc);
        let data = random_chunks(k, 48);
        let data_refs: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let mut p = vec![0u8; 48];
        let mut q = vec![0u8; 48];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut p, &mut q];
            codec.encode(&data_refs, &mut dests);
        }

        // Two data chunks (0 and 2) missing; recover both from 1, 3, P, Q.
        let survivor_idx = [1usize, 3, 4, 5];
        let survivors: Vec<&[u8]> =
            vec![data[1].as_slice(), data[3].as_slice(), p.as_slice(), q.as_slice()];
        let mut r0 = vec![0u8; 48];
        let mut r2 = vec![0u8; 48];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut r0, &mut r2];
            codec.rebuild(&survivor_idx, &survivors, &[0, 2], &mut dests).unwrap();
        }
        assert_eq!(r0, data[0]);
        assert_eq!(r2, data[2]);
    }

    #[test]
    fn rebuild_recovers_a_missing_parity_chunk() {
        let (k, pc) = (4usize, 2usize);
        let codec = Codec::new(k, pc);
        let data = random_chunks(k, 32);
        let data_refs: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let mut p = vec![0u8; 32];
        let mut q = vec![0u8; 32];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut p, &mut q];
            codec.encode(&data_refs, &mut dests);
        }

        // Q (chunk index 5) is missing; rebuild it from all data chunks and P.
        let survivor_idx = [0usize, 1, 2, 3];
        let survivors: Vec<&[u8]> = data.iter().map(|v| v.as_slice()).collect();
        let mut rebuilt_q = vec![0u8; 32];
        {
            let mut dests: Vec<&mut [u8]> = vec![&mut rebuilt_q];
            codec.rebuild(&survivor_idx, &survivors, &[5], &mut dests).unwrap();
        }
        assert_eq!(rebuilt_q, q);
    }
}
