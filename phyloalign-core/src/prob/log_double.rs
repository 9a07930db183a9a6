use std::cmp::Ordering;
use std::fmt;
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign};

/// A non-negative real stored as its natural logarithm.
///
/// Products of thousands of transition probabilities stay representable,
/// and ordering follows the represented value. Zero is `ln = -inf`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogDouble(f64);

impl LogDouble {
    pub const ZERO: LogDouble = LogDouble(f64::NEG_INFINITY);
    pub const ONE: LogDouble = LogDouble(0.0);

    /// Panics on negative or NaN input.
    pub fn new(p: f64) -> Self {
        assert!(p >= 0.0, "LogDouble::new: negative probability {p}");
        LogDouble(p.ln())
    }

    pub fn from_ln(ln: f64) -> Self {
        LogDouble(ln)
    }

    /// `2^e`, used to undo base-2 column scaling.
    pub fn pow2(e: i32) -> Self {
        LogDouble(e as f64 * std::f64::consts::LN_2)
    }

    pub fn ln(self) -> f64 {
        self.0
    }

    pub fn log2(self) -> f64 {
        self.0 / std::f64::consts::LN_2
    }

    pub fn to_f64(self) -> f64 {
        self.0.exp()
    }

    pub fn is_zero(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    pub fn powf(self, e: f64) -> Self {
        if e == 0.0 {
            return LogDouble::ONE;
        }
        LogDouble(self.0 * e)
    }

    pub fn powi(self, e: i32) -> Self {
        self.powf(e as f64)
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Total order for sorting; NaN sorts last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

impl Default for LogDouble {
    fn default() -> Self {
        LogDouble::ZERO
    }
}

impl From<f64> for LogDouble {
    fn from(p: f64) -> Self {
        LogDouble::new(p)
    }
}

impl Mul for LogDouble {
    type Output = LogDouble;
    fn mul(self, rhs: LogDouble) -> LogDouble {
        LogDouble(self.0 + rhs.0)
    }
}

impl MulAssign for LogDouble {
    fn mul_assign(&mut self, rhs: LogDouble) {
        self.0 += rhs.0;
    }
}

impl Div for LogDouble {
    type Output = LogDouble;
    fn div(self, rhs: LogDouble) -> LogDouble {
        LogDouble(self.0 - rhs.0)
    }
}

impl DivAssign for LogDouble {
    fn div_assign(&mut self, rhs: LogDouble) {
        self.0 -= rhs.0;
    }
}

impl Add for LogDouble {
    type Output = LogDouble;
    fn add(self, rhs: LogDouble) -> LogDouble {
        LogDouble(ln_add_exp(self.0, rhs.0))
    }
}

impl AddAssign for LogDouble {
    fn add_assign(&mut self, rhs: LogDouble) {
        self.0 = ln_add_exp(self.0, rhs.0);
    }
}

impl Sum for LogDouble {
    fn sum<I: Iterator<Item = LogDouble>>(iter: I) -> LogDouble {
        iter.fold(LogDouble::ZERO, |acc, x| acc + x)
    }
}

impl Product for LogDouble {
    fn product<I: Iterator<Item = LogDouble>>(iter: I) -> LogDouble {
        iter.fold(LogDouble::ONE, |acc, x| acc * x)
    }
}

impl fmt::Display for LogDouble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exp({})", self.0)
    }
}
