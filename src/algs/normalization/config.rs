//! Normalization options.

use serde::{Deserialize, Serialize};

use crate::filter_error::FilterError;

/// How a row's weights are corrected.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationStrategy {
    /// Rescale every weight by the reciprocal of the row total.
    #[default]
    ClassicalRowSum,
    /// Solve `(C·diag(w)·Cᵗ)·λ = e₀` and set `w' = diag(w)·Cᵗ·λ`.
    CorrectionFunction,
    /// Row-sum normalize to `w₀`, solve `(C·Cᵗ)·μ = e₀ − C·w₀`, set `w' = w₀ + Cᵗ·μ`.
    MinimalChange,
}

/// Highest polynomial degree a normalized row reproduces exactly.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproductionLevel {
    Constant,
    #[default]
    Linear,
    Quadratic,
}

impl ReproductionLevel {
    /// Rows of the constraint matrix in `dimension` spatial axes.
    pub fn num_constraints(self, dimension: usize) -> usize {
        match self {
            ReproductionLevel::Constant => 1,
            ReproductionLevel::Linear => 1 + dimension,
            ReproductionLevel::Quadratic => 1 + dimension + dimension * (dimension + 1) / 2,
        }
    }

    /// Next rung down the retry ladder.
    pub fn lower(self) -> Option<Self> {
        match self {
            ReproductionLevel::Quadratic => Some(ReproductionLevel::Linear),
            ReproductionLevel::Linear => Some(ReproductionLevel::Constant),
            ReproductionLevel::Constant => None,
        }
    }

    /// Highest level a row of `num_weights` entries can satisfy.
    pub fn supported_by(num_weights: usize, dimension: usize) -> Self {
        [ReproductionLevel::Quadratic, ReproductionLevel::Linear]
            .into_iter()
            .find(|level| level.num_constraints(dimension) <= num_weights)
            .unwrap_or(ReproductionLevel::Constant)
    }
}

/// Options for [`MatrixNormalizationAgent`](super::MatrixNormalizationAgent).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub strategy: NormalizationStrategy,
    pub reproduction: ReproductionLevel,
    /// Spatial axes entering the monomials (1, 2 or 3).
    pub dimension: usize,
    /// Relative pivot threshold of the dense solver.
    pub singular_tolerance: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            strategy: NormalizationStrategy::ClassicalRowSum,
            reproduction: ReproductionLevel::Linear,
            dimension: 3,
            singular_tolerance: 1e-12,
        }
    }
}

impl NormalizationConfig {
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(1..=3).contains(&self.dimension) {
            return Err(FilterError::InvalidDimension(self.dimension));
        }
        if !self.singular_tolerance.is_finite() || self.singular_tolerance < 0.0 {
            return Err(FilterError::InvalidTolerance(self.singular_tolerance));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_counts() {
        use ReproductionLevel::*;
        assert_eq!(
            [Constant, Linear, Quadratic].map(|l| l.num_constraints(3)),
            [1, 4, 10]
        );
        assert_eq!(Quadratic.num_constraints(2), 6);
        assert_eq!(Quadratic.num_constraints(1), 3);
    }

    #[test]
    fn size_cap() {
        use ReproductionLevel::*;
        assert_eq!(ReproductionLevel::supported_by(3, 3), Constant);
        assert_eq!(ReproductionLevel::supported_by(4, 3), Linear);
        assert_eq!(ReproductionLevel::supported_by(9, 3), Linear);
        assert_eq!(ReproductionLevel::supported_by(10, 3), Quadratic);
        assert_eq!(ReproductionLevel::supported_by(2, 1), Linear);
    }

    #[test]
    fn ladder_ends_at_constant() {
        let mut level = ReproductionLevel::Quadratic;
        let mut steps = 0;
        while let Some(next) = level.lower() {
            level = next;
            steps += 1;
        }
        assert_eq!((level, steps), (ReproductionLevel::Constant, 2));
    }

    #[test]
    fn json_uses_snake_case_and_defaults() {
        let cfg: NormalizationConfig =
            serde_json::from_str(r#"{"strategy":"minimal_change","reproduction":"quadratic"}"#)
                .unwrap();
        assert_eq!(cfg.strategy, NormalizationStrategy::MinimalChange);
        assert_eq!(cfg.reproduction, ReproductionLevel::Quadratic);
        assert_eq!(cfg.dimension, 3);
        assert!(NormalizationConfig { dimension: 4, ..cfg }.validate().is_err());
    }

    #[test]
    fn tolerance_must_be_finite_and_non_negative() {
        assert!(NormalizationConfig::default().validate().is_ok());
        let zero = NormalizationConfig {
            singular_tolerance: 0.0,
            ..NormalizationConfig::default()
        };
        assert!(zero.validate().is_ok());
        for bad in [-1e-12, f64::NAN, f64::INFINITY] {
            let cfg = NormalizationConfig {
                singular_tolerance: bad,
                ..NormalizationConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(FilterError::InvalidTolerance(_))));
        }
    }
}
