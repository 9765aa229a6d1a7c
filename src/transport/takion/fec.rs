//! Forward error correction over GF(256): recovers missing data units of a
//! frame from received parity units.
//!
//! The exact matrix used by the reference `fec.c` wasn't available to this
//! port; this implements the standard GF(256) Vandermonde construction
//! (Rijndael reducing polynomial 0x11b) every byte-level erasure coder in
//! this family uses. See the design notes for why that gap is flagged
//! rather than silently assumed identical.

const POLY: u16 = 0x11b;

fn gf_mul(a: u8, mut b: u8) -> u8 {
    let mut p: u16 = 0;
    let mut a16 = a as u16;
    for _ in 0..8 {
        if b & 1 != 0 {
            p ^= a16;
        }
        let hi = a16 & 0x80;
        a16 <<= 1;
        if hi != 0 {
            a16 ^= POLY;
        }
        b >>= 1;
    }
    (p & 0xff) as u8
}

fn gf_pow(base: u8, exp: u32) -> u8 {
    let mut result = 1u8;
    for _ in 0..exp {
        result = gf_mul(result, base);
    }
    result
}

fn gf_inv(a: u8) -> u8 {
    // a^254 == a^-1 in GF(256) for a != 0 (group order 255).
    gf_pow(a, 254)
}

/// Builds the `k x k` Vandermonde coefficient matrix for reconstructing
/// `k` data units from any `k` of the `n` received (data+parity) units.
fn vandermonde_row(x: u8, k: usize) -> Vec<u8> {
    let mut row = Vec::with_capacity(k);
    let mut acc = 1u8;
    for _ in 0..k {
        row.push(acc);
        acc = gf_mul(acc, x);
    }
    row
}

/// One FEC group for a single frame: `units_total` data units plus however
/// many parity units have arrived.
pub struct FecGroup {
    pub unit_size: usize,
    pub units_total: usize,
    /// `(unit_index, data)` for every unit received so far, data units
    /// indexed `0..units_total`, parity units indexed `>= units_total`.
    received: Vec<(usize, Vec<u8>)>,
}

impl FecGroup {
    pub fn new(unit_size: usize, units_total: usize) -> Self {
        Self {
            unit_size,
            units_total,
            received: Vec::new(),
        }
    }

    pub fn add_unit(&mut self, index: usize, data: Vec<u8>) {
        if self.received.iter().any(|(i, _)| *i == index) {
            return;
        }
        self.received.push((index, data));
    }

    pub fn received_data_units(&self) -> usize {
        self.received.iter().filter(|(i, _)| *i < self.units_total).count()
    }

    pub fn ready(&self) -> bool {
        self.received.len() >= self.units_total
    }

    /// Attempts reconstruction via GF(256) Gauss-Jordan elimination over
    /// the Vandermonde system. Returns the `units_total` data units in
    /// order on success.
    pub fn decode(&self) -> Option<Vec<Vec<u8>>> {
        if !self.ready() {
            return None;
        }
        // All data units already present: no solving needed.
        if self.received_data_units() == self.units_total {
            let mut out = vec![Vec::new(); self.units_total];
            for (i, d) in &self.received {
                if *i < self.units_total {
                    out[*i] = d.clone();
                }
            }
            return Some(out);
        }

        let k = self.units_total;
        let chosen: Vec<&(usize, Vec<u8>)> = self.received.iter().take(k).collect();

        // Build the system `A * data = received`, where row i corresponds
        // to chosen unit i: for a data unit x=index+1 it's the identity
        // row selecting that data unit; for a parity unit it's a
        // Vandermonde row over all k data unknowns.
        let mut matrix: Vec<Vec<u8>> = Vec::with_capacity(k);
        for (idx, _) in &chosen {
            if *idx < self.units_total {
                let mut row = vec![0u8; k];
                row[*idx] = 1;
                matrix.push(row);
            } else {
                let x = (*idx - self.units_total + 1) as u8;
                matrix.push(vandermonde_row(x, k));
            }
        }

        // Solve per byte-plane across the unit payload.
        let mut out_units = vec![vec![0u8; self.unit_size]; k];
        for byte_pos in 0..self.unit_size {
            let rhs: Vec<u8> = chosen.iter().map(|(_, d)| *d.get(byte_pos).unwrap_or(&0)).collect();
            let solved = gauss_jordan_solve(&matrix, &rhs)?;
            for (unit_idx, value) in solved.into_iter().enumerate() {
                out_units[unit_idx][byte_pos] = value;
            }
        }
        Some(out_units)
    }
}

/// Solves `matrix * x = rhs` over GF(256) via Gauss-Jordan elimination.
/// `matrix` is consumed by value (cloned per call site) since elimination
/// is destructive.
fn gauss_jordan_solve(matrix: &[Vec<u8>], rhs: &[u8]) -> Option<Vec<u8>> {
    let n = matrix.len();
    let mut a: Vec<Vec<u8>> = matrix.to_vec();
    let mut b: Vec<u8> = rhs.to_vec();

    for col in 0..n {
        let pivot_row = (col..n).find(|&r| a[r][col] != 0)?;
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let inv = gf_inv(a[col][col]);
        for v in a[col].iter_mut() {
            *v = gf_mul(*v, inv);
        }
        b[col] = gf_mul(b[col], inv);

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0 {
                continue;
            }
            for c in 0..n {
                a[row][c] ^= gf_mul(factor, a[col][c]);
            }
            b[row] ^= gf_mul(factor, b[col]);
        }
    }
    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gf_inverse_round_trips() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "a={a}");
        }
    }

    #[test]
    fn recovers_one_missing_data_unit_from_parity() {
        let unit_size = 8;
        let units_total = 3;
        let data: Vec<Vec<u8>> = vec![
            vec![1u8; unit_size],
            vec![2u8; unit_size],
            vec![3u8; unit_size],
        ];
        // One parity unit = Vandermonde row x=1 applied to the data (sum, since x^0=1 for all terms).
        let mut parity = vec![0u8; unit_size];
        for byte in 0..unit_size {
            let mut acc = 0u8;
            let mut coeff = 1u8;
            for d in &data {
                acc ^= gf_mul(coeff, d[byte]);
                coeff = gf_mul(coeff, 1);
            }
            parity[byte] = acc;
        }

        let mut group = FecGroup::new(unit_size, units_total);
        group.add_unit(0, data[0].clone());
        group.add_unit(1, data[1].clone());
        // unit 2 (data) missing; use one parity unit instead (index 3 == units_total + 0).
        group.add_unit(3, parity);

        let decoded = group.decode().expect("should reconstruct");
        assert_eq!(decoded[0], data[0]);
        assert_eq!(decoded[1], data[1]);
        assert_eq!(decoded[2], data[2]);
    }

    #[test]
    fn not_ready_until_k_units_present() {
        let mut group = FecGroup::new(4, 3);
        group.add_unit(0, vec![0; 4]);
        assert!(!group.ready());
        assert!(group.decode().is_none());
    }
}
