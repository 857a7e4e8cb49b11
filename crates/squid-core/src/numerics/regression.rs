//! Weighted linear correlation fit (heritage `WtdLinCorr`): generalized
//! least squares with a correlated covariance, MSWD, probability of fit,
//! and a single-point deletion diagnostic.
//!
//! Adjacent interpolated ratio points share one scan, so their errors are
//! correlated; the covariance is assembled in a `faer::Mat` and factorized
//! with a hand-rolled Cholesky kernel.

use faer::Mat;

/// Correlation between interpolation points built from consecutive scan
/// pairs. Heritage constant; non-adjacent points are uncorrelated.
pub const ADJACENT_POINT_RHO: f64 = 0.25;

/// Below this probability of fit the single-point deletion pass runs.
const MIN_PROBABILITY_OF_FIT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitModel {
    /// Constant fit: error-weighted mean with correlated weights.
    WeightedAverage,
    /// Unconstrained line `y = intercept + slope * t`.
    Line,
}

impl FitModel {
    const fn minimum_points(self) -> usize {
        match self {
            Self::WeightedAverage => 2,
            Self::Line => 3,
        }
    }

    /// Smallest sample that still has a residual degree of freedom after a
    /// trial deletion.
    const fn deletion_floor(self) -> usize {
        match self {
            Self::WeightedAverage => 4,
            Self::Line => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WtdLinCorrInput<'a> {
    pub values: &'a [f64],
    pub one_sigma_abs: &'a [f64],
    /// `adjacent_to_previous[i]` is true when point `i` shares a scan with
    /// point `i - 1` (consecutive scan pairs).
    pub adjacent_to_previous: &'a [bool],
    /// Required for `FitModel::Line`, ignored for the weighted average.
    pub abscissa: Option<&'a [f64]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WtdLinCorrResult {
    pub model: FitModel,
    pub intercept: f64,
    pub sigma_intercept: f64,
    pub slope: f64,
    pub sigma_slope: f64,
    pub cov_slope_intercept: f64,
    pub mswd: f64,
    pub probability_of_fit: f64,
    /// Index of the point removed by the deletion pass, -1 when none.
    pub min_index: i32,
}

impl WtdLinCorrResult {
    /// Line prediction and its one-sigma error at `t`, from the propagated
    /// slope/intercept covariance.
    pub fn predict(&self, t: f64) -> (f64, f64) {
        let value = self.intercept + self.slope * t;
        let variance = self.sigma_intercept * self.sigma_intercept
            + t * t * self.sigma_slope * self.sigma_slope
            + 2.0 * t * self.cov_slope_intercept;
        (value, variance.max(0.0).sqrt())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegressionError {
    #[error("{model:?} fit requires at least {required} points, got {actual}")]
    InsufficientPoints {
        model: FitModel,
        required: usize,
        actual: usize,
    },
    #[error(
        "regression input length mismatch: values={values}, sigmas={sigmas}, adjacency={adjacency}"
    )]
    LengthMismatch {
        values: usize,
        sigmas: usize,
        adjacency: usize,
    },
    #[error("line fit requires an abscissa of length {expected}, got {actual}")]
    BadAbscissa { expected: usize, actual: usize },
    #[error("one-sigma errors must be finite and > 0, index {index} got {value}")]
    InvalidSigma { index: usize, value: f64 },
    #[error("covariance matrix is not positive definite at pivot {pivot_index}")]
    NotPositiveDefinite { pivot_index: usize },
    #[error("normal equations are singular (degenerate abscissa)")]
    SingularNormalEquations,
}

pub fn wtd_lin_corr(
    model: FitModel,
    input: WtdLinCorrInput<'_>,
) -> Result<WtdLinCorrResult, RegressionError> {
    validate_input(model, input)?;

    let base = fit_once(
        model,
        input.values,
        input.one_sigma_abs,
        input.adjacent_to_previous,
        input.abscissa,
    )?;

    if base.probability_of_fit >= MIN_PROBABILITY_OF_FIT
        || input.values.len() < model.deletion_floor()
    {
        return Ok(base);
    }

    let mut best: Option<(usize, WtdLinCorrResult)> = None;
    for skip in 0..input.values.len() {
        let trial = fit_without_point(model, input, skip)?;
        match best {
            Some((_, incumbent)) if trial.mswd >= incumbent.mswd => {}
            _ => best = Some((skip, trial)),
        }
    }

    match best {
        Some((skip, mut trial)) if trial.mswd < base.mswd => {
            trial.min_index = skip as i32;
            Ok(trial)
        }
        _ => Ok(base),
    }
}

fn validate_input(model: FitModel, input: WtdLinCorrInput<'_>) -> Result<(), RegressionError> {
    let n = input.values.len();
    if input.one_sigma_abs.len() != n || input.adjacent_to_previous.len() != n {
        return Err(RegressionError::LengthMismatch {
            values: n,
            sigmas: input.one_sigma_abs.len(),
            adjacency: input.adjacent_to_previous.len(),
        });
    }
    if n < model.minimum_points() {
        return Err(RegressionError::InsufficientPoints {
            model,
            required: model.minimum_points(),
            actual: n,
        });
    }
    if model == FitModel::Line {
        let abscissa_len = input.abscissa.map_or(0, <[f64]>::len);
        if abscissa_len != n {
            return Err(RegressionError::BadAbscissa {
                expected: n,
                actual: abscissa_len,
            });
        }
    }
    for (index, sigma) in input.one_sigma_abs.iter().copied().enumerate() {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(RegressionError::InvalidSigma {
                index,
                value: sigma,
            });
        }
    }
    Ok(())
}

fn fit_without_point(
    model: FitModel,
    input: WtdLinCorrInput<'_>,
    skip: usize,
) -> Result<WtdLinCorrResult, RegressionError> {
    let mut values = Vec::with_capacity(input.values.len() - 1);
    let mut sigmas = Vec::with_capacity(values.capacity());
    let mut adjacency = Vec::with_capacity(values.capacity());
    let mut abscissa = input.abscissa.map(|_| Vec::with_capacity(values.capacity()));

    let mut previous_kept: Option<usize> = None;
    for index in 0..input.values.len() {
        if index == skip {
            continue;
        }
        values.push(input.values[index]);
        sigmas.push(input.one_sigma_abs[index]);
        // Adjacency only survives when the immediately preceding point was
        // kept as well.
        adjacency.push(
            index > 0
                && input.adjacent_to_previous[index]
                && previous_kept == Some(index - 1),
        );
        if let (Some(target), Some(source)) = (abscissa.as_mut(), input.abscissa) {
            target.push(source[index]);
        }
        previous_kept = Some(index);
    }

    fit_once(model, &values, &sigmas, &adjacency, abscissa.as_deref())
}

fn fit_once(
    model: FitModel,
    values: &[f64],
    sigmas: &[f64],
    adjacency: &[bool],
    abscissa: Option<&[f64]>,
) -> Result<WtdLinCorrResult, RegressionError> {
    let n = values.len();
    let covariance = covariance_matrix(sigmas, adjacency);
    let cholesky = cholesky_lower(&covariance)?;

    let ones = vec![1.0; n];
    let omega_ones = solve_cholesky(&cholesky, &ones);
    let omega_values = solve_cholesky(&cholesky, values);

    let s11 = dot(&ones, &omega_ones);
    let s1y = dot(&ones, &omega_values);

    let (intercept, sigma_intercept, slope, sigma_slope, cov_slope_intercept, dof);
    let residuals: Vec<f64>;

    match model {
        FitModel::WeightedAverage => {
            if s11 <= 0.0 {
                return Err(RegressionError::SingularNormalEquations);
            }
            intercept = s1y / s11;
            sigma_intercept = (1.0 / s11).sqrt();
            slope = 0.0;
            sigma_slope = 0.0;
            cov_slope_intercept = 0.0;
            residuals = values.iter().map(|value| value - intercept).collect();
            dof = n - 1;
        }
        FitModel::Line => {
            let t = abscissa.ok_or(RegressionError::BadAbscissa {
                expected: values.len(),
                actual: 0,
            })?;
            let omega_t = solve_cholesky(&cholesky, t);
            let s1t = dot(&ones, &omega_t);
            let stt = dot(t, &omega_t);
            let sty = dot(t, &omega_values);

            let determinant = s11 * stt - s1t * s1t;
            if determinant.abs() <= f64::EPSILON * s11.abs().max(stt.abs()) {
                return Err(RegressionError::SingularNormalEquations);
            }

            slope = (s11 * sty - s1t * s1y) / determinant;
            intercept = (stt * s1y - s1t * sty) / determinant;
            sigma_intercept = (stt / determinant).max(0.0).sqrt();
            sigma_slope = (s11 / determinant).max(0.0).sqrt();
            cov_slope_intercept = -s1t / determinant;
            residuals = values
                .iter()
                .zip(t)
                .map(|(value, t_i)| value - intercept - slope * t_i)
                .collect();
            dof = n - 2;
        }
    }

    let omega_residuals = solve_cholesky(&cholesky, &residuals);
    let chi_squared = dot(&residuals, &omega_residuals).max(0.0);
    let mswd = if dof > 0 { chi_squared / dof as f64 } else { 0.0 };
    let probability_of_fit = chi_squared_upper_tail(dof as f64, chi_squared);

    Ok(WtdLinCorrResult {
        model,
        intercept,
        sigma_intercept,
        slope,
        sigma_slope,
        cov_slope_intercept,
        mswd,
        probability_of_fit,
        min_index: -1,
    })
}

fn covariance_matrix(sigmas: &[f64], adjacency: &[bool]) -> Mat<f64> {
    let n = sigmas.len();
    let mut covariance = Mat::<f64>::zeros(n, n);
    for index in 0..n {
        covariance[(index, index)] = sigmas[index] * sigmas[index];
        if index > 0 && adjacency[index] {
            let off_diagonal = ADJACENT_POINT_RHO * sigmas[index] * sigmas[index - 1];
            covariance[(index, index - 1)] = off_diagonal;
            covariance[(index - 1, index)] = off_diagonal;
        }
    }
    covariance
}

fn cholesky_lower(matrix: &Mat<f64>) -> Result<Mat<f64>, RegressionError> {
    let n = matrix.nrows();
    let mut lower = Mat::<f64>::zeros(n, n);

    for col in 0..n {
        let mut diagonal = matrix[(col, col)];
        for k in 0..col {
            diagonal -= lower[(col, k)] * lower[(col, k)];
        }
        if diagonal <= 0.0 {
            return Err(RegressionError::NotPositiveDefinite { pivot_index: col });
        }
        let pivot = diagonal.sqrt();
        lower[(col, col)] = pivot;

        for row in (col + 1)..n {
            let mut value = matrix[(row, col)];
            for k in 0..col {
                value -= lower[(row, k)] * lower[(col, k)];
            }
            lower[(row, col)] = value / pivot;
        }
    }

    Ok(lower)
}

/// Solves `L L^T x = rhs` given the lower Cholesky factor.
fn solve_cholesky(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let n = lower.nrows();
    let mut forward = vec![0.0; n];
    for row in 0..n {
        let mut value = rhs[row];
        for col in 0..row {
            value -= lower[(row, col)] * forward[col];
        }
        forward[row] = value / lower[(row, row)];
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut value = forward[row];
        for col in (row + 1)..n {
            value -= lower[(col, row)] * solution[col];
        }
        solution[row] = value / lower[(row, row)];
    }
    solution
}

fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

/// Upper-tail probability of a chi-squared variate: `Q(dof/2, chi/2)`.
pub fn chi_squared_upper_tail(degrees_of_freedom: f64, chi_squared: f64) -> f64 {
    if degrees_of_freedom <= 0.0 {
        return 0.0;
    }
    if chi_squared <= 0.0 {
        return 1.0;
    }
    regularized_gamma_q(degrees_of_freedom / 2.0, chi_squared / 2.0)
}

const GAMMA_SERIES_EPSILON: f64 = 1.0e-14;
const GAMMA_MAX_ITERATIONS: usize = 500;

fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        (1.0 - regularized_gamma_p_series(a, x)).clamp(0.0, 1.0)
    } else {
        regularized_gamma_q_continued_fraction(a, x).clamp(0.0, 1.0)
    }
}

fn regularized_gamma_p_series(a: f64, x: f64) -> f64 {
    let mut term = 1.0 / a;
    let mut sum = term;
    for n in 1..GAMMA_MAX_ITERATIONS {
        term *= x / (a + n as f64);
        sum += term;
        if term.abs() < sum.abs() * GAMMA_SERIES_EPSILON {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

fn regularized_gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    // Modified Lentz evaluation of the incomplete-gamma continued fraction.
    let tiny = 1.0e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..GAMMA_MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_SERIES_EPSILON {
            break;
        }
    }

    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Lanczos approximation (g = 7, 9 coefficients); inputs here are always
/// positive half-integers.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 8] = [
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    let x = x - 1.0;
    let mut accumulator = 0.999_999_999_999_809_93;
    for (index, coefficient) in COEFFICIENTS.iter().enumerate() {
        accumulator += coefficient / (x + index as f64 + 1.0);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + accumulator.ln()
}

#[cfg(test)]
mod tests {
    use super::{
        ADJACENT_POINT_RHO, FitModel, RegressionError, WtdLinCorrInput, chi_squared_upper_tail,
        wtd_lin_corr,
    };

    fn assert_close(label: &str, expected: f64, actual: f64, tolerance: f64) {
        assert!(
            (expected - actual).abs() <= tolerance,
            "{label}: expected {expected}, got {actual}"
        );
    }

    #[test]
    fn chi_squared_tail_matches_reference_quantiles() {
        assert_close("dof=1", 0.05, chi_squared_upper_tail(1.0, 3.841_458_8), 1.0e-4);
        assert_close("dof=2", 0.05, chi_squared_upper_tail(2.0, 5.991_464_5), 1.0e-4);
        assert_close("dof=5", 0.05, chi_squared_upper_tail(5.0, 11.070_498), 1.0e-4);
        assert_eq!(chi_squared_upper_tail(3.0, 0.0), 1.0);
        assert_eq!(chi_squared_upper_tail(0.0, 4.0), 0.0);
    }

    #[test]
    fn uncorrelated_weighted_average_matches_closed_form() {
        let values = [10.0, 12.0, 11.0, 13.0];
        let sigmas = [1.0, 1.0, 1.0, 1.0];
        let adjacency = [false; 4];
        let result = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &adjacency,
                abscissa: None,
            },
        )
        .expect("fit");

        assert_close("mean", 11.5, result.intercept, 1.0e-12);
        assert_close("sigma", 0.5, result.sigma_intercept, 1.0e-12);
        assert_eq!(result.min_index, -1);
    }

    #[test]
    fn adjacent_correlation_inflates_the_average_uncertainty() {
        let values = [10.0, 10.2];
        let sigmas = [0.5, 0.5];
        let independent = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &[false, false],
                abscissa: None,
            },
        )
        .expect("independent fit");
        let correlated = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &[false, true],
                abscissa: None,
            },
        )
        .expect("correlated fit");

        // var(mean of 2) = sigma^2 (1 + rho) / 2 under equal errors.
        let expected = (0.25 * (1.0 + ADJACENT_POINT_RHO) / 2.0).sqrt();
        assert_close("correlated sigma", expected, correlated.sigma_intercept, 1.0e-12);
        assert!(correlated.sigma_intercept > independent.sigma_intercept);
    }

    #[test]
    fn line_fit_recovers_an_exact_line() {
        let abscissa = [0.0, 10.0, 20.0, 30.0, 40.0];
        let values: Vec<f64> = abscissa.iter().map(|t| 2.0 + 0.5 * t).collect();
        let sigmas = [0.1; 5];
        let adjacency = [false, true, true, true, true];

        let result = wtd_lin_corr(
            FitModel::Line,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &adjacency,
                abscissa: Some(&abscissa),
            },
        )
        .expect("fit");

        assert_close("intercept", 2.0, result.intercept, 1.0e-9);
        assert_close("slope", 0.5, result.slope, 1.0e-10);
        let (at_zero, _) = result.predict(0.0);
        assert_close("prediction at t=0", 2.0, at_zero, 1.0e-9);
        let mid = 20.0;
        let (at_mid, sigma_mid) = result.predict(mid);
        assert_close("prediction at midtime", 2.0 + 0.5 * mid, at_mid, 1.0e-9);
        assert!(sigma_mid > 0.0);
        assert_close("mswd of exact line", 0.0, result.mswd, 1.0e-18);
    }

    #[test]
    fn deletion_pass_flags_the_outlier_index() {
        let values = [10.0, 10.01, 9.99, 10.0, 30.0];
        let sigmas = [0.05; 5];
        let adjacency = [false, true, true, true, true];

        let result = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &adjacency,
                abscissa: None,
            },
        )
        .expect("fit");

        assert_eq!(result.min_index, 4);
        assert!(result.mswd < 1.0, "mswd {} after deletion", result.mswd);
        assert_close("intercept without outlier", 10.0, result.intercept, 0.05);
    }

    #[test]
    fn identical_pair_has_zero_scatter_and_no_deletion() {
        let values = [5.5, 5.5];
        let sigmas = [0.2, 0.2];
        let result = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &values,
                one_sigma_abs: &sigmas,
                adjacent_to_previous: &[false, true],
                abscissa: None,
            },
        )
        .expect("fit");

        assert_close("intercept", 5.5, result.intercept, 1.0e-12);
        assert!(result.mswd < 1.0e-20, "mswd {} should vanish", result.mswd);
        assert!(result.probability_of_fit > 0.999);
        assert_eq!(result.min_index, -1);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let error = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &[1.0],
                one_sigma_abs: &[0.1],
                adjacent_to_previous: &[false],
                abscissa: None,
            },
        )
        .expect_err("single point should fail");
        assert!(matches!(error, RegressionError::InsufficientPoints { .. }));

        let error = wtd_lin_corr(
            FitModel::WeightedAverage,
            WtdLinCorrInput {
                values: &[1.0, 2.0],
                one_sigma_abs: &[0.1, 0.0],
                adjacent_to_previous: &[false, false],
                abscissa: None,
            },
        )
        .expect_err("zero sigma should fail");
        assert!(matches!(error, RegressionError::InvalidSigma { index: 1, .. }));

        let error = wtd_lin_corr(
            FitModel::Line,
            WtdLinCorrInput {
                values: &[1.0, 2.0, 3.0],
                one_sigma_abs: &[0.1, 0.1, 0.1],
                adjacent_to_previous: &[false, true, true],
                abscissa: None,
            },
        )
        .expect_err("line fit without abscissa should fail");
        assert!(matches!(error, RegressionError::BadAbscissa { .. }));
    }
}
