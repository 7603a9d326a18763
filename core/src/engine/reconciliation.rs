//! Position/close-order reconciliation.
//!
//! Periodically compares the venue's reported net position against the
//! size of the engine's own active close orders and raises a fatal
//! mismatch once the drift exceeds a multiple of the trading quantity.

use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;

use crate::error::{EngineError, Result};

/// How many multiples of `quantity` the position and active close size
/// may drift apart before the engine treats it as fatal.
const MISMATCH_TOLERANCE_MULTIPLE: u64 = 2;

#[derive(Default)]
pub struct ReconciliationStats {
    checks: AtomicU64,
    mismatches: AtomicU64,
}

impl ReconciliationStats {
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    pub fn mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Relaxed)
    }
}

/// Compares reconciled position against active close-order size.
pub struct PositionReconciler {
    stats: ReconciliationStats,
}

impl PositionReconciler {
    pub fn new() -> Self {
        Self {
            stats: ReconciliationStats::default(),
        }
    }

    pub fn stats(&self) -> &ReconciliationStats {
        &self.stats
    }

    /// Returns `Ok(drift)` when the mismatch is within tolerance, or
    /// `Err(PositionMismatch)` once `|position - active_close_size|`
    /// exceeds `MISMATCH_TOLERANCE_MULTIPLE * quantity`.
    pub fn reconcile(
        &self,
        venue: &str,
        ticker: &str,
        position: Decimal,
        active_close_size: Decimal,
        quantity: Decimal,
    ) -> Result<Decimal> {
        self.stats.checks.fetch_add(1, Ordering::Relaxed);
        let drift = (position.abs() - active_close_size).abs();
        let tolerance = Decimal::from(MISMATCH_TOLERANCE_MULTIPLE) * quantity;

        if drift > tolerance {
            self.stats.mismatches.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::PositionMismatch {
                venue: venue.to_string(),
                ticker: ticker.to_string(),
                position,
                active_close_size,
            });
        }

        Ok(drift)
    }
}

impl Default for PositionReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn matching_position_and_close_size_is_ok() {
        let reconciler = PositionReconciler::new();
        let drift = reconciler
            .reconcile("lighter", "ETH", dec!(5), dec!(5), dec!(1))
            .unwrap();
        assert_eq!(drift, dec!(0));
    }

    #[test]
    fn drift_within_tolerance_is_ok() {
        let reconciler = PositionReconciler::new();
        let drift = reconciler
            .reconcile("lighter", "ETH", dec!(5), dec!(4), dec!(1))
            .unwrap();
        assert_eq!(drift, dec!(1));
    }

    #[test]
    fn drift_exceeding_tolerance_is_fatal() {
        let reconciler = PositionReconciler::new();
        let err = reconciler
            .reconcile("lighter", "ETH", dec!(5), dec!(2), dec!(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::PositionMismatch { .. }));
        assert_eq!(reconciler.stats().mismatches(), 1);
    }
}
