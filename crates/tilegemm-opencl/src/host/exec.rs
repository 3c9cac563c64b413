//! Work-group execution of the matrix-multiply kernel contract.

/// Scalar arguments 3..=8 of the matmul signature, in argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MatmulScalars {
    pub a_rows: usize,
    pub a_cols: usize,
    pub b_rows: usize,
    pub b_cols: usize,
    pub c_rows: usize,
    pub c_cols: usize,
}

impl MatmulScalars {
    pub fn from_args(args: [u32; 6]) -> Self {
        let [a_rows, a_cols, b_rows, b_cols, c_rows, c_cols] = args.map(|v| v as usize);
        Self { a_rows, a_cols, b_rows, b_cols, c_rows, c_cols }
    }

    /// Element counts the A, B and C buffers must hold.
    pub fn required_lens(&self) -> (usize, usize, usize) {
        (self.a_rows * self.a_cols, self.b_rows * self.b_cols, self.c_rows * self.c_cols)
    }
}

/// Run one launch. With `tile` set, each work-group stages `tile x tile`
/// blocks of A and B through local tiles, phase by phase, as the tiled kernel
/// does; without it every work-item computes its output element directly.
/// Loads outside A or B read zero and stores outside C are dropped.
pub(crate) fn run(
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    dims: MatmulScalars,
    global: [usize; 2],
    local: [usize; 2],
    tile: Option<usize>,
) {
    let groups = [global[0] / local[0], global[1] / local[1]];
    for group_row in 0..groups[0] {
        for group_col in 0..groups[1] {
            let origin = [group_row * local[0], group_col * local[1]];
            match tile {
                Some(t) => tiled_group(a, b, c, &dims, origin, t),
                None => direct_group(a, b, c, &dims, origin, local),
            }
        }
    }
}

fn load_a(a: &[f32], dims: &MatmulScalars, row: usize, col: usize) -> f32 {
    if row < dims.a_rows && col < dims.a_cols { a[row * dims.a_cols + col] } else { 0.0 }
}

fn load_b(b: &[f32], dims: &MatmulScalars, row: usize, col: usize) -> f32 {
    if row < dims.b_rows && col < dims.b_cols { b[row * dims.b_cols + col] } else { 0.0 }
}

fn store_c(c: &mut [f32], dims: &MatmulScalars, row: usize, col: usize, value: f32) {
    if row < dims.c_rows && col < dims.c_cols {
        c[row * dims.c_cols + col] = value;
    }
}

fn tiled_group(a: &[f32], b: &[f32], c: &mut [f32], dims: &MatmulScalars, origin: [usize; 2], t: usize) {
    let mut tile_a = vec![0.0f32; t * t];
    let mut tile_b = vec![0.0f32; t * t];
    let mut acc = vec![0.0f32; t * t];
    let phases = dims.a_cols.div_ceil(t);

    for p in 0..phases {
        for ty in 0..t {
            for tx in 0..t {
                tile_a[ty * t + tx] = load_a(a, dims, origin[0] + ty, p * t + tx);
                tile_b[ty * t + tx] = load_b(b, dims, p * t + ty, origin[1] + tx);
            }
        }
        // barrier
        for ty in 0..t {
            for tx in 0..t {
                let mut sum = acc[ty * t + tx];
                for k in 0..t {
                    sum += tile_a[ty * t + k] * tile_b[k * t + tx];
                }
                acc[ty * t + tx] = sum;
            }
        }
    }

    for ty in 0..t {
        for tx in 0..t {
            store_c(c, dims, origin[0] + ty, origin[1] + tx, acc[ty * t + tx]);
        }
    }
}

fn direct_group(a: &[f32], b: &[f32], c: &mut [f32], dims: &MatmulScalars, origin: [usize; 2], local: [usize; 2]) {
    for ly in 0..local[0] {
        for lx in 0..local[1] {
            let (row, col) = (origin[0] + ly, origin[1] + lx);
            let mut sum = 0.0f32;
            for k in 0..dims.a_cols {
                sum += load_a(a, dims, row, k) * load_b(b, dims, k, col);
            }
            store_c(c, dims, row, col, sum);
        }
    }
}
