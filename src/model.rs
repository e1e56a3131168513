//! The model interface.
//!
//! A model supplies the log-likelihood of the data and the log-prior of the
//! parameters. Both are evaluated on the bounded parameters `theta`; the
//! sampler handles reparameterization and tempering itself.

use thiserror::Error;

/// Errors that happen when we evaluate the log-likelihood or the log-prior
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during evaluation stop sampling,
    /// recoverable errors reject the proposed move.
    fn is_recoverable(&self) -> bool;
}

/// A target density split into likelihood and prior.
///
/// The trait is thread-safe so that independent replicates can share a model.
pub trait LogDensity: Send + Sync {
    type LogpError: LogpError;

    /// Log-likelihood of the data `x` at `theta`.
    fn loglike(&self, theta: &[f64], x: &[f64]) -> Result<f64, Self::LogpError>;

    /// Log-prior density at `theta`.
    fn logprior(&self, theta: &[f64]) -> Result<f64, Self::LogpError>;
}

/// Error type of closures that cannot fail.
#[derive(Error, Debug)]
pub enum NoLogpError {}

impl LogpError for NoLogpError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// A [`LogDensity`] made of two plain functions.
pub struct FnDensity<L, P> {
    loglike: L,
    logprior: P,
}

impl<L, P> FnDensity<L, P>
where
    L: Fn(&[f64], &[f64]) -> f64 + Send + Sync,
    P: Fn(&[f64]) -> f64 + Send + Sync,
{
    pub fn new(loglike: L, logprior: P) -> Self {
        Self { loglike, logprior }
    }
}

impl<L, P> LogDensity for FnDensity<L, P>
where
    L: Fn(&[f64], &[f64]) -> f64 + Send + Sync,
    P: Fn(&[f64]) -> f64 + Send + Sync,
{
    type LogpError = NoLogpError;

    fn loglike(&self, theta: &[f64], x: &[f64]) -> Result<f64, NoLogpError> {
        Ok((self.loglike)(theta, x))
    }

    fn logprior(&self, theta: &[f64]) -> Result<f64, NoLogpError> {
        Ok((self.logprior)(theta))
    }
}
