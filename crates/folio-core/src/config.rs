use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::FolioError;
use crate::optimizers::black_litterman::{default_risk_aversion, default_tau, TickerView, ViewSpecification};
use crate::optimizers::mean_variance::{MeanVarianceMethod, TauSweep};
use crate::optimizers::RiskModel;
use crate::solver::SolverSettings;
use crate::statistics::DateWindow;
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything the engine needs besides the prices. Every field has a default
/// so partial JSON/YAML documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mean-variance risk tolerance.
    pub tau: Decimal,
    pub return_model: ReturnModel,
    /// Annual rate; divided by `annualization_factor` where μ is per-period.
    pub risk_free_rate: Rate,
    pub annualization_factor: Decimal,
    /// Short selling for minimum variance ([-1, 1] instead of [0, 1]).
    pub allow_short: bool,
    pub risk_model: RiskModel,
    /// Black-Litterman only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_spec: Option<ViewConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    /// Overrides the per-optimizer default bounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<WeightBounds>,
    pub mean_variance: MeanVarianceOptions,
    pub solver: SolverSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tau: dec!(0.5),
            return_model: ReturnModel::Simple,
            risk_free_rate: dec!(0.02),
            annualization_factor: dec!(252),
            allow_short: false,
            risk_model: RiskModel::MeanVariance,
            view_spec: None,
            window: None,
            bounds: None,
            mean_variance: MeanVarianceOptions::default(),
            solver: SolverSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanVarianceOptions {
    pub method: MeanVarianceMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<TauSweep>,
}

/// Black-Litterman views, either as raw P/Q matrices or ticker-addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<Vec<Decimal>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Vec<Decimal>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<TickerView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omega: Option<Vec<Vec<Decimal>>>,
    #[serde(default = "default_tau")]
    pub tau: Decimal,
    /// Use δΣw_mkt as the prior instead of historical means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equilibrium: Option<EquilibriumConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumConfig {
    /// Market weight per ticker; every ticker in the universe must appear.
    pub market_weights: HashMap<String, Decimal>,
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: Decimal,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Deserialize a config document. Unknown `risk_model` / `return_model`
    /// names surface as validation errors, not parse errors.
    pub fn from_value(value: Value) -> FolioResult<Self> {
        check_model_names(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Checks that do not depend on the price data.
    pub fn validate(&self) -> FolioResult<()> {
        if self.tau < Decimal::ZERO {
            return Err(FolioError::validation(
                "tau",
                "Risk tolerance tau must be non-negative",
            ));
        }
        if self.annualization_factor <= Decimal::ZERO {
            return Err(FolioError::validation(
                "annualization_factor",
                "Must be positive",
            ));
        }
        if let Some(w) = &self.window {
            if w.start >= w.end {
                return Err(FolioError::validation(
                    "window",
                    format!("Start date {} must be earlier than end date {}", w.start, w.end),
                ));
            }
        }
        if let Some(b) = &self.bounds {
            if b.lower > b.upper {
                return Err(FolioError::validation(
                    "bounds",
                    format!("lower {} exceeds upper {}", b.lower, b.upper),
                ));
            }
        }
        if let Some(sweep) = &self.mean_variance.sweep {
            sweep.validate()?;
        }
        self.solver.validate()?;

        match (&self.view_spec, self.risk_model) {
            (None, RiskModel::BlackLitterman) => Err(FolioError::validation(
                "view_spec",
                "Required for the black-litterman risk model",
            )),
            (Some(views), _) => views.validate(),
            (None, _) => Ok(()),
        }
    }

    /// The risk-free rate in the same periodicity as the return statistics.
    pub fn periodic_risk_free_rate(&self) -> Rate {
        self.risk_free_rate / self.annualization_factor
    }

    /// Bounds for minimum variance, honoring `allow_short`.
    pub fn minimum_variance_bounds(&self) -> WeightBounds {
        match self.bounds {
            Some(b) => b,
            None if self.allow_short => WeightBounds::long_short(),
            None => WeightBounds::long_only(),
        }
    }

    /// Bounds for every other bounded optimizer.
    pub fn bounds(&self) -> WeightBounds {
        self.bounds.unwrap_or_default()
    }
}

/// Parse the model names of a raw config document with their `FromStr`
/// impls. Non-string values are left to serde.
pub fn check_model_names(value: &Value) -> FolioResult<()> {
    if let Some(name) = value.get("risk_model").and_then(Value::as_str) {
        name.parse::<RiskModel>()?;
    }
    if let Some(name) = value.get("return_model").and_then(Value::as_str) {
        name.parse::<ReturnModel>()?;
    }
    Ok(())
}

impl ViewConfig {
    pub fn validate(&self) -> FolioResult<()> {
        if self.tau <= Decimal::ZERO {
            return Err(FolioError::validation("view_spec.tau", "Must be positive"));
        }
        let has_matrix = self.p.is_some() || self.q.is_some();
        match (has_matrix, self.views.is_empty()) {
            (true, false) => Err(FolioError::validation(
                "view_spec",
                "Give either p/q or views, not both",
            )),
            (false, true) => Err(FolioError::validation(
                "view_spec",
                "At least one view required (p/q or views)",
            )),
            (true, true) if self.p.is_none() || self.q.is_none() => Err(FolioError::validation(
                "view_spec",
                "p and q must be given together",
            )),
            _ => Ok(()),
        }
    }

    /// Views in matrix form over `tickers`.
    pub fn resolve(&self, tickers: &Tickers) -> FolioResult<ViewSpecification> {
        self.validate()?;
        if !self.views.is_empty() {
            return ViewSpecification::from_views(tickers, &self.views, self.omega.clone());
        }
        let spec = ViewSpecification {
            p: self.p.clone().unwrap_or_default(),
            q: self.q.clone().unwrap_or_default(),
            omega: self.omega.clone(),
        };
        spec.validate(tickers.len())?;
        Ok(spec)
    }
}

impl EquilibriumConfig {
    /// Market weights ordered like `tickers`.
    pub fn market_weights(&self, tickers: &Tickers) -> FolioResult<LabeledVector> {
        let values = tickers
            .iter()
            .map(|t| {
                self.market_weights.get(t).copied().ok_or_else(|| {
                    FolioError::validation(
                        "view_spec.equilibrium.market_weights",
                        format!("No market weight for '{}'", t),
                    )
                })
            })
            .collect::<FolioResult<Vec<_>>>()?;
        if let Some(extra) = self.market_weights.keys().find(|k| tickers.position(k).is_none()) {
            return Err(FolioError::validation(
                "view_spec.equilibrium.market_weights",
                format!("Unknown ticker '{}'", extra),
            ));
        }
        LabeledVector::new(tickers.clone(), values)
    }
}
