use std::f64::consts::{PI, SQRT_2};

use tracing::warn;

use super::special::{betai, erf, gammainc, ln_gamma};
use super::LogDouble;
use crate::error::{PhyloError, PhyloResult};

const MAX_QUANTILE_ITERATIONS: usize = 2000;

/// Gamma distributions with a shape at or above this are replaced by a
/// moment-matched log-normal.
pub const GAMMA_LOGNORMAL_SHAPE: f64 = 1000.0;

/// Continuous univariate prior densities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Distribution {
    Uniform { start: f64, end: f64 },
    /// Parameterized by the mean.
    Exponential { mu: f64 },
    Gamma { shape: f64, scale: f64 },
    Beta { a: f64, b: f64 },
    Normal { mu: f64, sigma: f64 },
    LogNormal { lmu: f64, lsigma: f64 },
    Cauchy { location: f64, scale: f64 },
    Laplace { location: f64, scale: f64 },
    LogLaplace { location: f64, scale: f64 },
}

fn clamp_lsigma(s: f64) -> f64 {
    s.clamp(1.0e-5, 1.0e5)
}

fn clamp_beta(a: f64, b: f64) -> (f64, f64) {
    let (mut a, mut b) = (a, b);
    if a < 0.0 || b < 0.0 {
        warn!(a, b, "negative beta hyperparameter, using Beta(1,1)");
        a = 1.0;
        b = 1.0;
    }
    let r = 100.0 / a.max(b);
    if r < 1.0 {
        a *= r;
        b *= r;
    }
    (a, b)
}

/// (mu, sigma) of the log-normal with the same mean and variance.
fn lognormal_match(mean: f64, variance: f64) -> (f64, f64) {
    let sigma2 = (variance / (mean * mean)).ln_1p();
    let mu = mean.ln() - sigma2 / 2.0;
    (mu, clamp_lsigma(sigma2.sqrt()))
}

fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    0.5 * (1.0 + erf((x - mu) / (sigma * SQRT_2)))
}

fn normal_ln_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - 0.5 * (2.0 * PI).ln()
}

fn laplace_cdf(x: f64, m: f64, s: f64) -> f64 {
    if x < m {
        0.5 * ((x - m) / s).exp()
    } else {
        1.0 - 0.5 * (-(x - m) / s).exp()
    }
}

fn laplace_quantile(p: f64, m: f64, s: f64) -> f64 {
    if p < 0.5 {
        m + s * (2.0 * p).ln()
    } else {
        m - s * (2.0 * (1.0 - p)).ln()
    }
}

impl Distribution {
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Uniform { .. } => "uniform",
            Distribution::Exponential { .. } => "exponential",
            Distribution::Gamma { .. } => "gamma",
            Distribution::Beta { .. } => "beta",
            Distribution::Normal { .. } => "normal",
            Distribution::LogNormal { .. } => "log_normal",
            Distribution::Cauchy { .. } => "cauchy",
            Distribution::Laplace { .. } => "laplace",
            Distribution::LogLaplace { .. } => "log_laplace",
        }
    }

    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Distribution::Uniform { start, end } => {
                if x < start || x > end {
                    f64::NEG_INFINITY
                } else {
                    -(end - start).ln()
                }
            }
            Distribution::Exponential { mu } => {
                if x < 0.0 {
                    f64::NEG_INFINITY
                } else {
                    -x / mu - mu.ln()
                }
            }
            Distribution::Gamma { shape, scale } => {
                if shape >= GAMMA_LOGNORMAL_SHAPE {
                    let (lmu, lsigma) = lognormal_match(shape * scale, shape * scale * scale);
                    return Distribution::LogNormal { lmu, lsigma }.ln_pdf(x);
                }
                if x < 0.0 || (x == 0.0 && shape != 1.0) {
                    return f64::NEG_INFINITY;
                }
                if x == 0.0 {
                    return -scale.ln();
                }
                (shape - 1.0) * x.ln() - x / scale - ln_gamma(shape) - shape * scale.ln()
            }
            Distribution::Beta { a, b } => {
                let (a, b) = clamp_beta(a, b);
                if x <= 0.0 || x >= 1.0 {
                    return f64::NEG_INFINITY;
                }
                (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() + ln_gamma(a + b)
                    - ln_gamma(a)
                    - ln_gamma(b)
            }
            Distribution::Normal { mu, sigma } => normal_ln_pdf(x, mu, sigma),
            Distribution::LogNormal { lmu, lsigma } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                normal_ln_pdf(x.ln(), lmu, clamp_lsigma(lsigma)) - x.ln()
            }
            Distribution::Cauchy { location, scale } => {
                let z = (x - location) / scale;
                -(PI * scale * (1.0 + z * z)).ln()
            }
            Distribution::Laplace { location, scale } => {
                -(x - location).abs() / scale - (2.0 * scale).ln()
            }
            Distribution::LogLaplace { location, scale } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                Distribution::Laplace { location, scale }.ln_pdf(x.ln()) - x.ln()
            }
        }
    }

    pub fn pdf(&self, x: f64) -> LogDouble {
        LogDouble::from_ln(self.ln_pdf(x))
    }

    pub fn cdf(&self, x: f64) -> f64 {
        match *self {
            Distribution::Uniform { start, end } => ((x - start) / (end - start)).clamp(0.0, 1.0),
            Distribution::Exponential { mu } => {
                if x <= 0.0 {
                    0.0
                } else {
                    -(-x / mu).exp_m1()
                }
            }
            Distribution::Gamma { shape, scale } => {
                if shape >= GAMMA_LOGNORMAL_SHAPE {
                    let (lmu, lsigma) = lognormal_match(shape * scale, shape * scale * scale);
                    return Distribution::LogNormal { lmu, lsigma }.cdf(x);
                }
                gammainc(shape, x / scale)
            }
            Distribution::Beta { a, b } => {
                let (a, b) = clamp_beta(a, b);
                betai(a, b, x)
            }
            Distribution::Normal { mu, sigma } => normal_cdf(x, mu, sigma),
            Distribution::LogNormal { lmu, lsigma } => {
                if x <= 0.0 {
                    0.0
                } else {
                    normal_cdf(x.ln(), lmu, clamp_lsigma(lsigma))
                }
            }
            Distribution::Cauchy { location, scale } => {
                0.5 + ((x - location) / scale).atan() / PI
            }
            Distribution::Laplace { location, scale } => laplace_cdf(x, location, scale),
            Distribution::LogLaplace { location, scale } => {
                if x <= 0.0 {
                    0.0
                } else {
                    laplace_cdf(x.ln(), location, scale)
                }
            }
        }
    }

    /// Inverse CDF. `p` is clamped to [0, 1].
    pub fn quantile(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match *self {
            Distribution::Uniform { start, end } => start + p * (end - start),
            Distribution::Exponential { mu } => -mu * (-p).ln_1p(),
            Distribution::Gamma { shape, scale } => {
                if shape >= GAMMA_LOGNORMAL_SHAPE {
                    let (lmu, lsigma) = lognormal_match(shape * scale, shape * scale * scale);
                    return Distribution::LogNormal { lmu, lsigma }.quantile(p);
                }
                self.solve_quantile(p, 0.0, f64::INFINITY)
            }
            Distribution::Beta { .. } => self.solve_quantile(p, 0.0, 1.0),
            Distribution::Normal { .. } => {
                self.solve_quantile(p, f64::NEG_INFINITY, f64::INFINITY)
            }
            Distribution::LogNormal { lmu, lsigma } => {
                let z = Distribution::Normal {
                    mu: lmu,
                    sigma: clamp_lsigma(lsigma),
                }
                .quantile(p);
                z.exp()
            }
            Distribution::Cauchy { location, scale } => location + scale * (PI * (p - 0.5)).tan(),
            Distribution::Laplace { location, scale } => laplace_quantile(p, location, scale),
            Distribution::LogLaplace { location, scale } => {
                laplace_quantile(p, location, scale).exp()
            }
        }
    }

    /// Newton steps on `cdf(x) - p`, falling back to bisection whenever a
    /// step leaves the current bracket. Infinite support ends are replaced
    /// by doubling until the bracket contains the root.
    fn solve_quantile(&self, p: f64, lower: f64, upper: f64) -> f64 {
        if p <= 0.0 && lower.is_finite() {
            return lower;
        }
        if p >= 1.0 && upper.is_finite() {
            return upper;
        }

        let mut lo = lower;
        let mut hi = upper;
        if lo.is_infinite() {
            lo = -1.0;
            for _ in 0..MAX_QUANTILE_ITERATIONS {
                if self.cdf(lo) <= p {
                    break;
                }
                lo *= 2.0;
            }
        }
        if hi.is_infinite() {
            hi = lo.abs().max(1.0);
            for _ in 0..MAX_QUANTILE_ITERATIONS {
                if self.cdf(hi) >= p {
                    break;
                }
                hi *= 2.0;
            }
        }

        let mut x = 0.5 * (lo + hi);
        for _ in 0..MAX_QUANTILE_ITERATIONS {
            let f = self.cdf(x) - p;
            if f == 0.0 {
                return x;
            }
            if f < 0.0 {
                lo = x;
            } else {
                hi = x;
            }
            if hi - lo <= 1e-12 * (1.0 + x.abs()) {
                break;
            }
            let d = self.ln_pdf(x).exp();
            let step = x - f / d;
            x = if d > 0.0 && step > lo && step < hi {
                step
            } else {
                0.5 * (lo + hi)
            };
        }
        x
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Uniform { start, end } => 0.5 * (start + end),
            Distribution::Exponential { mu } => mu,
            Distribution::Gamma { shape, scale } => shape * scale,
            Distribution::Beta { a, b } => {
                let (a, b) = clamp_beta(a, b);
                a / (a + b)
            }
            Distribution::Normal { mu, .. } => mu,
            Distribution::LogNormal { lmu, lsigma } => {
                let s = clamp_lsigma(lsigma);
                (lmu + 0.5 * s * s).exp()
            }
            Distribution::Cauchy { .. } => f64::NAN,
            Distribution::Laplace { location, .. } => location,
            Distribution::LogLaplace { location, scale } => {
                if scale < 1.0 {
                    location.exp() / (1.0 - scale * scale)
                } else {
                    f64::INFINITY
                }
            }
        }
    }

    pub fn variance(&self) -> f64 {
        match *self {
            Distribution::Uniform { start, end } => (end - start).powi(2) / 12.0,
            Distribution::Exponential { mu } => mu * mu,
            Distribution::Gamma { shape, scale } => shape * scale * scale,
            Distribution::Beta { a, b } => {
                let (a, b) = clamp_beta(a, b);
                a * b / ((a + b).powi(2) * (a + b + 1.0))
            }
            Distribution::Normal { sigma, .. } => sigma * sigma,
            Distribution::LogNormal { lmu, lsigma } => {
                let s2 = clamp_lsigma(lsigma).powi(2);
                s2.exp_m1() * (2.0 * lmu + s2).exp()
            }
            Distribution::Cauchy { .. } => f64::NAN,
            Distribution::Laplace { scale, .. } => 2.0 * scale * scale,
            Distribution::LogLaplace { location, scale } => {
                if scale < 0.5 {
                    let s2 = scale * scale;
                    (2.0 * location).exp() * (1.0 / (1.0 - 4.0 * s2) - 1.0 / (1.0 - s2).powi(2))
                } else {
                    f64::INFINITY
                }
            }
        }
    }
}

/// Dirichlet density of the simplex point `x` with concentrations `n`.
pub fn dirichlet_pdf(x: &[f64], n: &[f64]) -> PhyloResult<LogDouble> {
    if x.len() != n.len() {
        return Err(PhyloError::DistributionArgs {
            name: "dirichlet".to_string(),
            expected: x.len(),
            got: n.len(),
        });
    }
    let total: f64 = x.iter().sum();
    if x.iter().any(|&v| v < 0.0) || (total - 1.0).abs() > 1e-6 {
        return Ok(LogDouble::ZERO);
    }
    let mut ln = ln_gamma(n.iter().sum());
    for (&xi, &ni) in x.iter().zip(n) {
        if ni != 1.0 {
            ln += (ni - 1.0) * xi.ln();
        }
        ln -= ln_gamma(ni);
    }
    Ok(LogDouble::from_ln(ln))
}
