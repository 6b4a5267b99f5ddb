use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AllocationError;
use crate::types::{money_to_f64, Money};
use crate::AllocationResult;

/// Absolute tolerance when comparing mirrored covariance entries.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Eigenvalues below `-PSD_TOLERANCE * max(1, |λ_max|)` reject the matrix.
const PSD_TOLERANCE: f64 = 1e-8;

/// Ratio λ_min / λ_max under which a covariance matrix is reported as near-singular.
const NEAR_SINGULAR_RATIO: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Read-only snapshot of the investable universe for one optimization session.
///
/// Produced by an upstream data collaborator and never mutated by the engine;
/// it is `Send + Sync` and may be shared across concurrent optimizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetData {
    /// Unique asset identifiers, in solver order.
    pub names: Vec<String>,
    /// Last traded price per share (strictly positive).
    pub prices: Vec<Money>,
    /// Per-period mean return for each asset.
    pub expected_returns: Vec<f64>,
    /// Per-period return covariance, n x n, symmetric.
    pub covariance_matrix: Vec<Vec<f64>>,
}

/// Spectral summary of the covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovarianceSpectrum {
    pub min_eigenvalue: f64,
    pub max_eigenvalue: f64,
}

impl CovarianceSpectrum {
    pub fn is_near_singular(&self) -> bool {
        self.max_eigenvalue <= 0.0 || self.min_eigenvalue <= NEAR_SINGULAR_RATIO * self.max_eigenvalue
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl AssetData {
    /// Build and validate an asset snapshot.
    pub fn new(
        names: Vec<String>,
        prices: Vec<Money>,
        expected_returns: Vec<f64>,
        covariance_matrix: Vec<Vec<f64>>,
    ) -> AllocationResult<Self> {
        let data = AssetData {
            names,
            prices,
            expected_returns,
            covariance_matrix,
        };
        data.validate()?;
        Ok(data)
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Check dimensional agreement, price positivity, finiteness, symmetry
    /// and positive semi-definiteness of the covariance matrix.
    ///
    /// Near-singular matrices are accepted; they are logged and left to the
    /// solvers, which report `Unbounded` or `NumericalDegenerate` when the
    /// singular direction matters.
    pub fn validate(&self) -> AllocationResult<()> {
        let n = self.names.len();
        if n == 0 {
            return Err(AllocationError::invalid("names", "At least one asset required"));
        }

        let mut seen = HashSet::with_capacity(n);
        for (i, name) in self.names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(AllocationError::invalid(
                    "names",
                    format!("Asset {} has an empty name", i),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(AllocationError::invalid(
                    "names",
                    format!("Duplicate asset name '{}'", name),
                ));
            }
        }

        if self.prices.len() != n {
            return Err(AllocationError::invalid(
                "prices",
                format!("Expected {} prices but got {}", n, self.prices.len()),
            ));
        }
        for (name, price) in self.names.iter().zip(self.prices.iter()) {
            if *price <= Money::ZERO {
                return Err(AllocationError::invalid(
                    "prices",
                    format!("Price of '{}' must be positive, got {}", name, price),
                ));
            }
        }

        if self.expected_returns.len() != n {
            return Err(AllocationError::invalid(
                "expected_returns",
                format!(
                    "Expected {} returns but got {}",
                    n,
                    self.expected_returns.len()
                ),
            ));
        }
        if let Some(i) = self.expected_returns.iter().position(|r| !r.is_finite()) {
            return Err(AllocationError::invalid(
                "expected_returns",
                format!("Return of '{}' is not finite", self.names[i]),
            ));
        }

        validate_covariance_matrix(&self.covariance_matrix, n)?;

        let spectrum = self.spectrum();
        let floor = -PSD_TOLERANCE * spectrum.max_eigenvalue.abs().max(1.0);
        if spectrum.min_eigenvalue < floor {
            return Err(AllocationError::invalid(
                "covariance_matrix",
                format!(
                    "Not positive semi-definite: minimum eigenvalue {:e}",
                    spectrum.min_eigenvalue
                ),
            ));
        }
        if spectrum.is_near_singular() {
            tracing::warn!(
                min_eigenvalue = spectrum.min_eigenvalue,
                max_eigenvalue = spectrum.max_eigenvalue,
                "covariance matrix is near-singular"
            );
        }

        Ok(())
    }

    /// Covariance as a dense matrix, symmetrized to absorb input rounding.
    pub fn covariance(&self) -> DMatrix<f64> {
        let n = self.len();
        DMatrix::from_fn(n, n, |i, j| {
            0.5 * (self.covariance_matrix[i][j] + self.covariance_matrix[j][i])
        })
    }

    /// Expected returns as a dense vector.
    pub fn returns(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.expected_returns)
    }

    /// Prices in solver space.
    pub fn prices_f64(&self) -> AllocationResult<Vec<f64>> {
        self.prices
            .iter()
            .map(|p| money_to_f64(*p, "prices"))
            .collect()
    }

    /// Extreme eigenvalues of the (symmetrized) covariance matrix.
    pub fn spectrum(&self) -> CovarianceSpectrum {
        let eigen = self.covariance().symmetric_eigen();
        let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        let max_eigenvalue = eigen
            .eigenvalues
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        CovarianceSpectrum {
            min_eigenvalue,
            max_eigenvalue,
        }
    }

    /// Equal weights 1/n, the fresh starting state for restarting strategies.
    pub fn equal_weights(&self) -> Vec<f64> {
        let n = self.len();
        vec![1.0 / n as f64; n]
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_covariance_matrix(cov: &[Vec<f64>], n: usize) -> AllocationResult<()> {
    if cov.len() != n {
        return Err(AllocationError::invalid(
            "covariance_matrix",
            format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        ));
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(AllocationError::invalid(
                "covariance_matrix",
                format!("Row {} has {} columns, expected {}", i, row.len(), n),
            ));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(AllocationError::invalid(
                "covariance_matrix",
                format!("Row {} contains a non-finite entry", i),
            ));
        }
        if row[i] < 0.0 {
            return Err(AllocationError::invalid(
                "covariance_matrix",
                format!("Negative variance on diagonal [{},{}]={}", i, i, row[i]),
            ));
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (cov[i][j] - cov[j][i]).abs() > SYMMETRY_TOLERANCE {
                return Err(AllocationError::invalid(
                    "covariance_matrix",
                    format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                ));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn diagonal(n: usize, var: f64) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { var } else { 0.0 }).collect())
            .collect()
    }

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("stock_{}", i)).collect()
    }

    #[test]
    fn test_valid_snapshot() {
        let data = AssetData::new(
            names(3),
            vec![dec!(10), dec!(20), dec!(30)],
            vec![0.01, 0.02, 0.03],
            diagonal(3, 0.04),
        )
        .unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.equal_weights(), vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn test_empty_universe_rejected() {
        let err = AssetData::new(vec![], vec![], vec![], vec![]).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidParameter { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = AssetData::new(
            vec!["A".into(), "A".into()],
            vec![dec!(1), dec!(1)],
            vec![0.0, 0.0],
            diagonal(2, 0.01),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let err = AssetData::new(
            names(2),
            vec![dec!(10), dec!(0)],
            vec![0.0, 0.0],
            diagonal(2, 0.01),
        )
        .unwrap_err();
        match err {
            AllocationError::InvalidParameter { field, .. } => assert_eq!(field, "prices"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01],
            diagonal(2, 0.01),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected_returns"));
    }

    #[test]
    fn test_asymmetric_covariance_rejected() {
        let err = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01, 0.02],
            vec![vec![0.04, 0.01], vec![0.02, 0.04]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Not symmetric"));
    }

    #[test]
    fn test_indefinite_covariance_rejected() {
        // Correlation of 2 is not a covariance.
        let err = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01, 0.02],
            vec![vec![0.01, 0.02], vec![0.02, 0.01]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("positive semi-definite"));
    }

    #[test]
    fn test_singular_covariance_accepted() {
        // Perfectly correlated pair: rank one, still PSD.
        let data = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01, 0.02],
            vec![vec![0.04, 0.04], vec![0.04, 0.04]],
        )
        .unwrap();
        let spectrum = data.spectrum();
        assert!(spectrum.is_near_singular());
        assert!((spectrum.max_eigenvalue - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_nearly_collinear_pair_flagged() {
        // ρ = 1 − 2.5e-9 gives λ_min/λ_max ≈ 1.25e-9.
        let cov = 0.0004 * (1.0 - 2.5e-9);
        let data = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01, 0.02],
            vec![vec![0.0004, cov], vec![cov, 0.0004]],
        )
        .unwrap();
        assert!(data.spectrum().is_near_singular());

        let independent = AssetData::new(
            names(2),
            vec![dec!(10), dec!(10)],
            vec![0.01, 0.02],
            vec![vec![0.0004, 0.0], vec![0.0, 0.0001]],
        )
        .unwrap();
        assert!(!independent.spectrum().is_near_singular());
    }
}
