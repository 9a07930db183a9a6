use crate::error::{PhyloError, PhyloResult};

/// Knobs for one 1-D forward/sampling pass.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DpConfig {
    /// Renormalize each position by a power of two. Turning this off only
    /// changes intermediate magnitudes, and is only safe for short inputs.
    pub rescale: bool,
    /// Heating exponent applied to emission weights.
    pub beta: f64,
}

impl Default for DpConfig {
    fn default() -> Self {
        Self {
            rescale: true,
            beta: 1.0,
        }
    }
}

impl DpConfig {
    pub fn without_rescaling(mut self) -> Self {
        self.rescale = false;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn validate(&self) -> PhyloResult<()> {
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(PhyloError::InvalidConfig {
                msg: format!("beta must be finite and >= 0, got {}", self.beta),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerConfig {
    pub dp: DpConfig,
    /// Drop dead-end states with a backward pass before sampling.
    pub prune: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            dp: DpConfig::default(),
            prune: true,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> PhyloResult<()> {
        self.dp.validate()
    }
}
