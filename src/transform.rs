//! Reparameterization between bounded parameters `theta` and the unbounded
//! working coordinates `y` the random walk moves in.

use itertools::izip;

use crate::{
    config::{ConfigurationError, ParameterSpec},
    math::log_sigmoid,
};

/// Per-dimension reparameterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformType {
    /// `theta = y`. Bounds are enforced by rejecting moves that leave them.
    Identity,
    /// `theta = min + exp(y)` on `(min, inf)`.
    Log,
    /// `theta = max - exp(y)` on `(-inf, max)`.
    LogUpper,
    /// `theta = min + (max - min) * sigmoid(y)` on `(min, max)`.
    Logit,
}

impl TransformType {
    /// Decode the integer transform codes used by host argument bundles.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Identity),
            1 => Some(Self::Log),
            2 => Some(Self::LogUpper),
            3 => Some(Self::Logit),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Identity => 0,
            Self::Log => 1,
            Self::LogUpper => 2,
            Self::Logit => 3,
        }
    }

    /// Check that the bounds are usable for this transform.
    pub(crate) fn check_bounds(
        &self,
        dim: usize,
        min: f64,
        max: f64,
    ) -> Result<(), ConfigurationError> {
        let fail = |field: &'static str, reason: String| {
            Err(ConfigurationError::Domain { field, dim, reason })
        };
        if min.is_nan() || max.is_nan() {
            return fail("theta_min", "bounds must not be NaN".into());
        }
        if min > max {
            return fail("theta_min", format!("lower bound {} above upper bound {}", min, max));
        }
        match self {
            Self::Identity => Ok(()),
            Self::Log if !min.is_finite() => {
                fail("theta_min", "log transform needs a finite lower bound".into())
            }
            Self::LogUpper if !max.is_finite() => {
                fail("theta_max", "log transform needs a finite upper bound".into())
            }
            Self::Logit if !(min.is_finite() && max.is_finite() && min < max) => fail(
                "theta_max",
                "logit transform needs finite bounds with min < max".into(),
            ),
            _ => Ok(()),
        }
    }

    /// Whether `theta` is a legal value. Open transforms exclude their bounds.
    #[inline]
    pub(crate) fn admits(&self, theta: f64, min: f64, max: f64) -> bool {
        if !theta.is_finite() {
            return false;
        }
        match self {
            Self::Identity => (theta >= min) & (theta <= max),
            Self::Log => (theta > min) & (theta <= max),
            Self::LogUpper => (theta >= min) & (theta < max),
            Self::Logit => (theta > min) & (theta < max),
        }
    }

    #[inline]
    fn forward(&self, theta: f64, min: f64, max: f64) -> f64 {
        match self {
            Self::Identity => theta,
            Self::Log => (theta - min).ln(),
            Self::LogUpper => (max - theta).ln(),
            Self::Logit => (theta - min).ln() - (max - theta).ln(),
        }
    }

    #[inline]
    fn inverse(&self, y: f64, min: f64, max: f64) -> f64 {
        match self {
            Self::Identity => y,
            Self::Log => min + y.exp(),
            Self::LogUpper => max - y.exp(),
            Self::Logit => {
                // Evaluate from the nearer bound to keep precision in the tails
                if y >= 0. {
                    max - (max - min) / (1. + y.exp())
                } else {
                    min + (max - min) / (1. + (-y).exp())
                }
            }
        }
    }

    #[inline]
    fn log_jacobian(&self, y: f64, min: f64, max: f64) -> f64 {
        match self {
            Self::Identity => 0.,
            Self::Log | Self::LogUpper => y,
            Self::Logit => (max - min).ln() + log_sigmoid(y) + log_sigmoid(-y),
        }
    }
}

/// A point of the parameter space in both coordinate systems.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    /// Working coordinates the proposal moves in.
    pub y: Box<[f64]>,
    /// Bounded model parameters.
    pub theta: Box<[f64]>,
    /// `log |d theta / d y|`, summed over dimensions.
    pub log_jacobian: f64,
}

/// Bounds and transforms of all dimensions. Stateless.
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    params: Box<[ParameterSpec]>,
}

impl ParameterSpace {
    pub fn new(params: &[ParameterSpec]) -> Result<Self, ConfigurationError> {
        for (dim, param) in params.iter().enumerate() {
            param.transform.check_bounds(dim, param.min, param.max)?;
            if !param.transform.admits(param.init, param.min, param.max) {
                return Err(ConfigurationError::Domain {
                    field: "theta_init",
                    dim,
                    reason: format!(
                        "{} is not a legal value in [{}, {}]",
                        param.init, param.min, param.max
                    ),
                });
            }
        }
        Ok(Self {
            params: params.into(),
        })
    }

    pub fn dim(&self) -> usize {
        self.params.len()
    }

    pub fn forward(&self, theta: &[f64]) -> Box<[f64]> {
        assert!(theta.len() == self.dim());
        izip!(self.params.iter(), theta)
            .map(|(p, &theta)| p.transform.forward(theta, p.min, p.max))
            .collect()
    }

    pub fn inverse(&self, y: &[f64]) -> Box<[f64]> {
        assert!(y.len() == self.dim());
        izip!(self.params.iter(), y)
            .map(|(p, &y)| p.transform.inverse(y, p.min, p.max))
            .collect()
    }

    pub fn log_jacobian(&self, y: &[f64]) -> f64 {
        assert!(y.len() == self.dim());
        izip!(self.params.iter(), y)
            .map(|(p, &y)| p.transform.log_jacobian(y, p.min, p.max))
            .sum()
    }

    /// Whether every component of `theta` is a legal value of its dimension.
    pub fn contains(&self, theta: &[f64]) -> bool {
        theta.len() == self.dim()
            && izip!(self.params.iter(), theta)
                .all(|(p, &theta)| p.transform.admits(theta, p.min, p.max))
    }

    /// The state at working coordinates `y`, or `None` if it leaves the bounds.
    pub fn state(&self, y: Box<[f64]>) -> Option<ParameterState> {
        let theta = self.inverse(&y);
        if !self.contains(&theta) {
            return None;
        }
        let log_jacobian = self.log_jacobian(&y);
        Some(ParameterState {
            y,
            theta,
            log_jacobian,
        })
    }

    /// The state of the configured initial values.
    pub fn initial_state(&self) -> Result<ParameterState, ConfigurationError> {
        let init: Vec<f64> = self.params.iter().map(|p| p.init).collect();
        let y = self.forward(&init);
        let log_jacobian = self.log_jacobian(&y);
        if !log_jacobian.is_finite() || y.iter().any(|val| !val.is_finite()) {
            return Err(ConfigurationError::Domain {
                field: "theta_init",
                dim: y.iter().position(|val| !val.is_finite()).unwrap_or(0),
                reason: "initial value maps to a non-finite working coordinate".into(),
            });
        }
        // Keep the configured values exactly instead of the round-tripped ones.
        Ok(ParameterState {
            y,
            theta: init.into(),
            log_jacobian,
        })
    }
}
