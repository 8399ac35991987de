use rust_decimal::Decimal;
use tracing::debug;

use crate::error::FolioError;
use crate::linalg::{dot, max_abs, mat_vec_multiply, solve_linear};
use crate::solver::SolverSettings;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// minimize ½ xᵗHx + cᵗx  s.t.  1ᵗx = total,  lower <= x <= upper
#[derive(Debug, Clone, Copy)]
pub struct BoxQp<'a> {
    pub hessian: &'a [Vec<Decimal>],
    pub linear: &'a [Decimal],
    pub total: Decimal,
    pub lower: &'a [Decimal],
    pub upper: &'a [Decimal],
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: Vec<Decimal>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Primal active-set method for a convex QP on the budget set.
///
/// `start` must be feasible. Each iteration solves the equality-constrained
/// KKT system on the free coordinates; a zero step triggers a multiplier
/// check that either certifies optimality or releases the most violated
/// bound, a non-zero step is cut at the first blocking bound.
#[allow(clippy::needless_range_loop)]
pub fn solve_qp(problem: &BoxQp, start: &[Decimal], settings: &SolverSettings) -> FolioResult<QpSolution> {
    let n = start.len();
    validate_problem(problem, n)?;

    let tol = settings.tolerance;
    let lambda_tol = tol * (Decimal::ONE + problem_scale(problem));
    let mut x = start.to_vec();

    let mut working: Vec<Option<Bound>> = (0..n)
        .map(|i| {
            if x[i] == problem.lower[i] {
                Some(Bound::Lower)
            } else if x[i] == problem.upper[i] {
                Some(Bound::Upper)
            } else {
                None
            }
        })
        .collect();

    // The budget row needs at least one free coordinate
    if working.iter().all(Option::is_some) {
        if let Some(i) = (0..n).find(|&i| problem.lower[i] < problem.upper[i]) {
            working[i] = None;
        }
    }

    let mut last_step = Decimal::ZERO;
    for iteration in 1..=settings.max_iterations {
        let free: Vec<usize> = (0..n).filter(|&i| working[i].is_none()).collect();
        let gradient = qp_gradient(problem, &x);
        let (step, nu) = kkt_step(problem.hessian, &gradient, &free)?;
        last_step = max_abs(&step);

        if last_step <= tol {
            // Multipliers of the bound constraints: lower needs g_i + nu >= 0,
            // upper needs -(g_i + nu) >= 0.
            let mut most_negative: Option<(usize, Decimal)> = None;
            for i in 0..n {
                let lambda = match working[i] {
                    Some(Bound::Lower) => gradient[i] + nu,
                    Some(Bound::Upper) => -(gradient[i] + nu),
                    None => continue,
                };
                if lambda < -lambda_tol && most_negative.map_or(true, |(_, m)| lambda < m) {
                    most_negative = Some((i, lambda));
                }
            }
            match most_negative {
                None => {
                    debug!(
                        iterations = iteration,
                        objective = %qp_objective(problem, &x),
                        "active-set QP converged"
                    );
                    return Ok(QpSolution {
                        x,
                        iterations: iteration,
                    });
                }
                Some((i, _)) => {
                    working[i] = None;
                    continue;
                }
            }
        }

        let mut alpha = Decimal::ONE;
        let mut blocking: Option<(usize, Bound)> = None;
        for (k, &i) in free.iter().enumerate() {
            let p = step[k];
            if p < Decimal::ZERO {
                let limit = (problem.lower[i] - x[i]) / p;
                if limit < alpha {
                    alpha = limit;
                    blocking = Some((i, Bound::Lower));
                }
            } else if p > Decimal::ZERO {
                let limit = (problem.upper[i] - x[i]) / p;
                if limit < alpha {
                    alpha = limit;
                    blocking = Some((i, Bound::Upper));
                }
            }
        }
        let alpha = alpha.max(Decimal::ZERO);

        for (k, &i) in free.iter().enumerate() {
            x[i] += alpha * step[k];
        }
        if let Some((i, side)) = blocking {
            x[i] = match side {
                Bound::Lower => problem.lower[i],
                Bound::Upper => problem.upper[i],
            };
            working[i] = Some(side);
        }
    }

    Err(FolioError::Convergence {
        solver: "Active-set QP".into(),
        iterations: settings.max_iterations,
        last_delta: last_step,
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn qp_gradient(problem: &BoxQp, x: &[Decimal]) -> Vec<Decimal> {
    mat_vec_multiply(problem.hessian, x)
        .into_iter()
        .zip(problem.linear.iter())
        .map(|(hx, c)| hx + *c)
        .collect()
}

/// Solve [H_FF 1; 1ᵗ 0] [p; nu] = [-g_F; 0] and return (p, nu).
fn kkt_step(hessian: &[Vec<Decimal>], gradient: &[Decimal], free: &[usize]) -> FolioResult<(Vec<Decimal>, Decimal)> {
    let m = free.len();
    let mut kkt = vec![vec![Decimal::ZERO; m + 1]; m + 1];
    let mut rhs = vec![Decimal::ZERO; m + 1];
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            kkt[a][b] = hessian[i][j];
        }
        kkt[a][m] = Decimal::ONE;
        kkt[m][a] = Decimal::ONE;
        rhs[a] = -gradient[i];
    }
    let solution = solve_linear(&kkt, &rhs, "QP KKT system")?;
    let nu = solution[m];
    Ok((solution[..m].to_vec(), nu))
}

fn problem_scale(problem: &BoxQp) -> Decimal {
    let h = problem
        .hessian
        .iter()
        .map(|row| max_abs(row))
        .fold(Decimal::ZERO, Decimal::max);
    h.max(max_abs(problem.linear))
}

fn validate_problem(problem: &BoxQp, n: usize) -> FolioResult<()> {
    if n == 0 {
        return Err(FolioError::validation("qp", "Problem has no variables"));
    }
    if problem.hessian.len() != n
        || problem.hessian.iter().any(|row| row.len() != n)
        || problem.linear.len() != n
        || problem.lower.len() != n
        || problem.upper.len() != n
    {
        return Err(FolioError::validation(
            "qp",
            format!("All problem data must have dimension {}", n),
        ));
    }
    let lower_sum: Decimal = problem.lower.iter().sum();
    let upper_sum: Decimal = problem.upper.iter().sum();
    if lower_sum > problem.total || upper_sum < problem.total {
        return Err(FolioError::validation(
            "bounds",
            format!(
                "Infeasible: bounds allow totals in [{}, {}] but {} is required",
                lower_sum, upper_sum, problem.total
            ),
        ));
    }
    Ok(())
}

/// Objective value ½ xᵗHx + cᵗx.
pub fn qp_objective(problem: &BoxQp, x: &[Decimal]) -> Decimal {
    let hx = mat_vec_multiply(problem.hessian, x);
    dot(x, &hx) / Decimal::TWO + dot(problem.linear, x)
}
