#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

/// `log(1 / (1 + exp(-x)))` without overflow for large `|x|`.
#[inline]
pub(crate) fn log_sigmoid(x: f64) -> f64 {
    -logaddexp(0., -x)
}

/// Map NaN and `+inf` to `-inf`, which forces a rejection.
#[inline]
pub(crate) fn finite_or_neg_inf(val: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        f64::NEG_INFINITY
    }
}

/// Metropolis decision for a log acceptance ratio.
///
/// `log_uniform` is only evaluated if the move is not accepted outright.
#[inline]
pub(crate) fn metropolis_accept(log_ratio: f64, log_uniform: impl FnOnce() -> f64) -> bool {
    if log_ratio.is_nan() {
        return false;
    }
    if log_ratio >= 0. {
        return true;
    }
    log_uniform() < log_ratio
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Trapezoidal integral of `ys` over the grid `xs`.
pub(crate) fn trapezoid(xs: &[f64], ys: &[f64]) -> f64 {
    assert!(xs.len() == ys.len());
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn check_logaddexp() {
        let x = 1f64;
        let y = 2f64;
        let res = logaddexp(x, y);
        assert_abs_diff_eq!(res, (x.exp() + y.exp()).ln(), epsilon = 1e-12);
        assert_eq!(logaddexp(f64::NEG_INFINITY, 3.), 3.);
    }

    #[test]
    fn check_log_sigmoid() {
        assert_abs_diff_eq!(log_sigmoid(0.), 0.5f64.ln(), epsilon = 1e-15);
        assert_abs_diff_eq!(log_sigmoid(-800.), -800., epsilon = 1e-9);
        assert!(log_sigmoid(800.) <= 0.);
        assert!(log_sigmoid(800.).abs() < 1e-300);
    }

    #[test]
    fn check_trapezoid() {
        let xs = [0., 0.25, 1.];
        let ys = [1., 1., 1.];
        assert_abs_diff_eq!(trapezoid(&xs, &ys), 1.);
        let ys = [0., 0.25, 1.];
        assert_abs_diff_eq!(trapezoid(&xs, &ys), 0.25 * 0.125 + 0.75 * 0.625);
        assert_eq!(trapezoid(&[0.5], &[3.]), 0.);
    }

    #[test]
    fn check_metropolis() {
        assert!(metropolis_accept(0., || panic!("not needed")));
        assert!(!metropolis_accept(f64::NAN, || 0.));
        assert!(!metropolis_accept(f64::NEG_INFINITY, || -1e300));
        assert!(metropolis_accept(-1., || -2.));
        assert!(!metropolis_accept(-1., || -0.5));
    }
}
