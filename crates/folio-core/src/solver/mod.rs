//! Constrained solvers shared by the optimizers.
//!
//! Every problem here lives on the budget set `{x : sum(x) = total,
//! lower <= x <= upper}`. Quadratic objectives go through the active-set QP
//! in [`qp`]; smooth nonlinear objectives go through the SQP driver in
//! [`sqp`], which itself solves one QP per iteration.

pub mod qp;
pub mod sqp;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::FolioError;
use crate::types::WeightBounds;
use crate::FolioResult;

pub use qp::{solve_qp, BoxQp, QpSolution};
pub use sqp::{minimize, Objective, SqpSolution};

/// Iteration cap and convergence tolerance for the iterative solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Hard cap on outer iterations (default 500).
    pub max_iterations: u32,
    /// Step-size tolerance in weight units (default 1e-10).
    pub tolerance: Decimal,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iterations: 500,
            tolerance: dec!(0.0000000001),
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> FolioResult<()> {
        if self.max_iterations == 0 {
            return Err(FolioError::validation(
                "solver.max_iterations",
                "Must be at least 1",
            ));
        }
        if self.tolerance <= Decimal::ZERO || self.tolerance >= dec!(0.01) {
            return Err(FolioError::validation(
                "solver.tolerance",
                format!("Must be in (0, 0.01), got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

/// Expand uniform bounds into per-asset lower/upper vectors.
pub fn bound_vectors(bounds: &WeightBounds, n: usize) -> (Vec<Decimal>, Vec<Decimal>) {
    (vec![bounds.lower; n], vec![bounds.upper; n])
}

/// Equal weights for n assets.
pub fn equal_weights(n: usize) -> Vec<Decimal> {
    let w = Decimal::ONE / Decimal::from(n as i64);
    vec![w; n]
}

/// A point of the budget set as close to equal weights as the bounds allow:
/// start from `total / n`, clamp into the bounds, then spread the residual
/// over the assets that still have room.
pub fn feasible_start(lower: &[Decimal], upper: &[Decimal], total: Decimal) -> FolioResult<Vec<Decimal>> {
    let n = lower.len();
    if n == 0 || upper.len() != n {
        return Err(FolioError::validation(
            "bounds",
            format!("Expected {} lower and upper bounds", n),
        ));
    }
    let lower_sum: Decimal = lower.iter().sum();
    let upper_sum: Decimal = upper.iter().sum();
    if lower_sum > total || upper_sum < total {
        return Err(FolioError::validation(
            "bounds",
            format!(
                "Infeasible: bounds allow totals in [{}, {}] but {} is required",
                lower_sum, upper_sum, total
            ),
        ));
    }

    let share = total / Decimal::from(n as i64);
    let mut x: Vec<Decimal> = (0..n).map(|i| share.max(lower[i]).min(upper[i])).collect();

    for _ in 0..=n {
        let residual = total - x.iter().copied().sum::<Decimal>();
        if residual.is_zero() {
            break;
        }
        let room: Vec<usize> = (0..n)
            .filter(|&i| {
                if residual > Decimal::ZERO {
                    x[i] < upper[i]
                } else {
                    x[i] > lower[i]
                }
            })
            .collect();
        if room.is_empty() {
            break;
        }
        let step = residual / Decimal::from(room.len() as i64);
        if step.is_zero() {
            break;
        }
        for &i in &room {
            x[i] = (x[i] + step).max(lower[i]).min(upper[i]);
        }
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        assert!(SolverSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let zero_iter = SolverSettings {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(zero_iter.validate().is_err());
        let bad_tol = SolverSettings {
            tolerance: Decimal::ZERO,
            ..Default::default()
        };
        assert!(bad_tol.validate().is_err());
    }

    #[test]
    fn test_feasible_start_equal_weights() {
        let (lo, hi) = bound_vectors(&WeightBounds::long_only(), 4);
        let x = feasible_start(&lo, &hi, Decimal::ONE).unwrap();
        assert_eq!(x, vec![dec!(0.25); 4]);
    }

    #[test]
    fn test_feasible_start_respects_tight_bounds() {
        let lo = vec![dec!(0.5), dec!(0), dec!(0)];
        let hi = vec![dec!(1), dec!(0.1), dec!(1)];
        let x = feasible_start(&lo, &hi, Decimal::ONE).unwrap();
        let sum: Decimal = x.iter().sum();
        assert!((sum - Decimal::ONE).abs() < dec!(0.000000001));
        assert!(x[0] >= dec!(0.5));
        assert!(x[1] <= dec!(0.1));
    }

    #[test]
    fn test_feasible_start_infeasible() {
        let lo = vec![dec!(0.6), dec!(0.6)];
        let hi = vec![dec!(1), dec!(1)];
        assert!(feasible_start(&lo, &hi, Decimal::ONE).is_err());
    }
}
