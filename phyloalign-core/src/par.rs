// Per-branch and per-state work fans out over rayon when the `parallel`
// feature is on, and falls back to plain iterators otherwise.

/// Map `$f` over `$items` into a collection.
macro_rules! par_map {
    ($items:expr, $f:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
            $items.par_iter().map($f).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $items.iter().map($f).collect()
        }
    }};
}

/// Fallible map. `$f` returns a `Result`; the first error wins.
macro_rules! par_try_map {
    ($items:expr, $f:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
            $items.par_iter().map($f).collect::<Result<_, _>>()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $items.iter().map($f).collect::<Result<_, _>>()
        }
    }};
}

/// Product of `$f` over `$items`. Used for multiplying independent
/// `LogDouble` factors.
macro_rules! par_product {
    ($items:expr, $f:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
            $items.par_iter().map($f).product()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $items.iter().map($f).product()
        }
    }};
}
