#[cfg(feature = "simd")]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    use wide::f64x4;

    let n = a.len().min(b.len());
    let chunks = n / 4;
    let mut acc = f64x4::splat(0.0);
    for k in 0..chunks {
        let i = 4 * k;
        let x = f64x4::from([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let y = f64x4::from([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        acc += x * y;
    }
    let mut total = acc.reduce_add();
    for i in (4 * chunks)..n {
        total += a[i] * b[i];
    }
    total
}

#[cfg(not(feature = "simd"))]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Multiplies every entry by `2^e` without overflowing the factor.
pub(crate) fn scale_by_pow2(row: &mut [f64], e: i32) {
    let mut e = e;
    while e != 0 {
        let step = e.clamp(-1000, 1000);
        let f = 2f64.powi(step);
        for v in row.iter_mut() {
            *v *= f;
        }
        e -= step;
    }
}
