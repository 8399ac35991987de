use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::error::FolioError;
use crate::linalg::{dot, max_abs, mat_vec_multiply, sqrt_decimal};
use crate::solver::qp::{solve_qp, BoxQp};
use crate::solver::SolverSettings;
use crate::FolioResult;

/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO_C: Decimal = dec!(0.0001);
const MAX_BACKTRACKS: u32 = 40;
/// Below this sᵗBs the BFGS update is skipped.
const CURVATURE_FLOOR: Decimal = dec!(0.000000000000000000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A smooth objective over portfolio weights.
pub trait Objective {
    /// Name used in solver errors and logs.
    fn name(&self) -> &str;

    fn value(&self, w: &[Decimal]) -> FolioResult<Decimal>;

    fn gradient(&self, w: &[Decimal]) -> FolioResult<Vec<Decimal>>;
}

#[derive(Debug, Clone)]
pub struct SqpSolution {
    pub x: Vec<Decimal>,
    /// Unscaled objective value at `x`.
    pub value: Decimal,
    pub iterations: u32,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Minimize `objective` on `{w : sum(w) = 1, lower <= w <= upper}` by
/// sequential quadratic programming.
///
/// Each iteration solves the QP model `min ½ dᵗBd + gᵗd` over feasible
/// directions, backtracks along `d` until the Armijo condition holds, and
/// updates `B` with Powell-damped BFGS so it stays positive definite. The
/// objective is divided by the infinity norm of the starting gradient.
pub fn minimize(
    objective: &dyn Objective,
    start: &[Decimal],
    lower: &[Decimal],
    upper: &[Decimal],
    settings: &SolverSettings,
) -> FolioResult<SqpSolution> {
    let n = start.len();
    let mut x = start.to_vec();
    let mut gradient = objective.gradient(&x)?;
    let scale = max_abs(&gradient);
    if scale.is_zero() {
        let value = objective.value(&x)?;
        return Ok(SqpSolution {
            x,
            value,
            iterations: 0,
        });
    }
    scale_in_place(&mut gradient, scale);
    let mut f = objective.value(&x)? / scale;

    let loose_tolerance = sqrt_decimal(settings.tolerance);
    let mut hessian = identity(n);
    let zeros = vec![Decimal::ZERO; n];
    let mut step_norm = Decimal::ZERO;

    for iteration in 1..=settings.max_iterations {
        let lo_d: Vec<Decimal> = lower.iter().zip(&x).map(|(l, xi)| *l - *xi).collect();
        let up_d: Vec<Decimal> = upper.iter().zip(&x).map(|(u, xi)| *u - *xi).collect();
        let subproblem = BoxQp {
            hessian: &hessian,
            linear: &gradient,
            total: Decimal::ZERO,
            lower: &lo_d,
            upper: &up_d,
        };
        let direction = solve_qp(&subproblem, &zeros, settings)?.x;
        step_norm = max_abs(&direction);

        if step_norm <= settings.tolerance {
            debug!(
                objective = objective.name(),
                iterations = iteration,
                "SQP converged"
            );
            return Ok(SqpSolution {
                value: f * scale,
                x,
                iterations: iteration,
            });
        }

        let slope = dot(&gradient, &direction);
        let accepted = if slope < Decimal::ZERO {
            line_search(objective, &x, &direction, f, slope, scale, lower, upper)?
        } else {
            None
        };

        let Some((alpha, x_new, f_new)) = accepted else {
            // No descent possible at working precision
            if step_norm <= loose_tolerance {
                debug!(
                    objective = objective.name(),
                    iterations = iteration,
                    step = %step_norm,
                    "SQP stopped at precision limit"
                );
                return Ok(SqpSolution {
                    value: f * scale,
                    x,
                    iterations: iteration,
                });
            }
            return Err(FolioError::Convergence {
                solver: format!("SQP ({})", objective.name()),
                iterations: iteration,
                last_delta: step_norm,
            });
        };

        let mut gradient_new = objective.gradient(&x_new)?;
        scale_in_place(&mut gradient_new, scale);

        let s: Vec<Decimal> = direction.iter().map(|d| *d * alpha).collect();
        let y: Vec<Decimal> = gradient_new
            .iter()
            .zip(&gradient)
            .map(|(a, b)| *a - *b)
            .collect();
        damped_bfgs_update(&mut hessian, &s, &y);

        debug!(
            objective = objective.name(),
            iteration,
            value = %(f_new * scale),
            step = %step_norm,
            alpha = %alpha,
            "SQP iteration"
        );

        x = x_new;
        f = f_new;
        gradient = gradient_new;
    }

    Err(FolioError::Convergence {
        solver: format!("SQP ({})", objective.name()),
        iterations: settings.max_iterations,
        last_delta: step_norm,
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Backtracking from alpha = 1. Returns (alpha, x_new, scaled f(x_new)).
#[allow(clippy::too_many_arguments)]
fn line_search(
    objective: &dyn Objective,
    x: &[Decimal],
    direction: &[Decimal],
    f: Decimal,
    slope: Decimal,
    scale: Decimal,
    lower: &[Decimal],
    upper: &[Decimal],
) -> FolioResult<Option<(Decimal, Vec<Decimal>, Decimal)>> {
    let mut alpha = Decimal::ONE;
    for _ in 0..MAX_BACKTRACKS {
        let candidate: Vec<Decimal> = x
            .iter()
            .zip(direction)
            .enumerate()
            .map(|(i, (xi, di))| (*xi + alpha * *di).max(lower[i]).min(upper[i]))
            .collect();
        let f_new = objective.value(&candidate)? / scale;
        if f_new <= f + ARMIJO_C * alpha * slope {
            return Ok(Some((alpha, candidate, f_new)));
        }
        alpha /= Decimal::TWO;
    }
    Ok(None)
}

/// Powell-damped BFGS: replaces y by r = θy + (1-θ)Bs when sᵗy < 0.2 sᵗBs.
fn damped_bfgs_update(hessian: &mut [Vec<Decimal>], s: &[Decimal], y: &[Decimal]) {
    let bs = mat_vec_multiply(hessian, s);
    let s_bs = dot(s, &bs);
    if s_bs <= CURVATURE_FLOOR {
        return;
    }
    let s_y = dot(s, y);
    let threshold = dec!(0.2) * s_bs;
    let theta = if s_y >= threshold {
        Decimal::ONE
    } else {
        dec!(0.8) * s_bs / (s_bs - s_y)
    };
    let r: Vec<Decimal> = y
        .iter()
        .zip(&bs)
        .map(|(yi, bsi)| theta * *yi + (Decimal::ONE - theta) * *bsi)
        .collect();
    let s_r = dot(s, &r);
    if s_r <= CURVATURE_FLOOR {
        return;
    }
    for (i, row) in hessian.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = *cell - bs[i] * bs[j] / s_bs + r[i] * r[j] / s_r;
        }
    }
}

fn identity(n: usize) -> Vec<Vec<Decimal>> {
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if i == j { Decimal::ONE } else { Decimal::ZERO })
                .collect()
        })
        .collect()
}

fn scale_in_place(v: &mut [Decimal], scale: Decimal) {
    for x in v.iter_mut() {
        *x /= scale;
    }
}
