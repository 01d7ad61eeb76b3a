/// Sinusoidal positional embedding table, `max_len x dim`, row-major.
///
/// `PE[pos][2i] = sin(pos / 10000^(2i/dim))`, `PE[pos][2i+1] = cos(pos / 10000^(2i/dim))`.
pub fn sinusoidal_table(max_len: usize, dim: usize) -> Vec<f32> {
    let mut table = vec![0.0f32; max_len * dim];
    if dim == 0 {
        return table;
    }
    for pos in 0..max_len {
        let row = &mut table[pos * dim..(pos + 1) * dim];
        for pair in 0..dim.div_ceil(2) {
            let exponent = (2 * pair) as f64 / dim as f64;
            let angle = pos as f64 / 10000f64.powf(exponent);
            row[2 * pair] = angle.sin() as f32;
            if 2 * pair + 1 < dim {
                row[2 * pair + 1] = angle.cos() as f32;
            }
        }
    }
    table
}
