//! Per-contract order book maintenance: snapshot + delta application,
//! sequence-gap detection, and size-filtered best-bid/best-ask lookup.
//!
//! The maintainer itself is transport-agnostic; adapters feed it
//! `BookLevel` updates decoded from their own wire format and drive its
//! state transitions on gap/connect/disconnect.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Levels below this notional (price * size) are dust the engine cannot
/// reliably fill against and are excluded from best-bid/best-ask.
pub const NOTIONAL_MIN: u64 = 40_000;

/// Maximum resting levels kept per side before pruning the far end of
/// the book. Pruning never discards a level nearer the top than this.
const MAX_LEVELS_PER_SIDE: usize = 100;

/// A single price level update: `size == 0` means "remove this price".
#[derive(Debug, Clone, Copy)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    Disconnected,
    Connecting,
    AwaitingSnapshot,
    Live,
    GapDetected,
}

/// Maintains one contract's order book from a snapshot+delta stream.
///
/// Bids and asks are keyed directly by `Decimal` price rather than by a
/// `(mantissa, scale)` pair: `Decimal`'s `Ord` already compares by true
/// numeric value across differing scales, which a raw mantissa/scale
/// tuple does not (e.g. `100` has mantissa 100 at scale 0, `99.5` has
/// mantissa 995 at scale 1 — lexicographic comparison would sort `100`
/// below `99.5`).
pub struct OrderBookMaintainer {
    contract_id: String,
    state: BookState,
    offset: u64,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBookMaintainer {
    pub fn new(contract_id: impl Into<String>) -> Self {
        Self {
            contract_id: contract_id.into(),
            state: BookState::Disconnected,
            offset: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn set_state(&mut self, state: BookState) {
        self.state = state;
    }

    /// Clear both sides and apply a fresh snapshot at `offset`.
    pub fn apply_snapshot(&mut self, offset: u64, bids: Vec<BookLevel>, asks: Vec<BookLevel>) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            self.upsert(true, level);
        }
        for level in asks {
            self.upsert(false, level);
        }
        self.offset = offset;
        self.state = BookState::Live;
        debug!(contract_id = %self.contract_id, offset, "order book snapshot applied");
    }

    /// Apply one delta. Returns `Ok(())` on a clean sequential apply,
    /// `Err(gap_size)` if `offset` jumped ahead of expectation (caller
    /// must request a fresh snapshot), and silently ignores stale/
    /// duplicate deltas (`offset <= current`).
    pub fn apply_delta(
        &mut self,
        offset: u64,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    ) -> Result<(), u64> {
        if offset <= self.offset {
            debug!(contract_id = %self.contract_id, offset, current = self.offset, "ignoring stale/duplicate delta");
            return Ok(());
        }

        if offset > self.offset + 1 {
            let gap = offset - self.offset - 1;
            warn!(
                contract_id = %self.contract_id,
                expected = self.offset + 1,
                received = offset,
                gap,
                "sequence gap detected"
            );
            self.state = BookState::GapDetected;
            return Err(gap);
        }

        for level in bids {
            self.upsert(true, level);
        }
        for level in asks {
            self.upsert(false, level);
        }
        self.offset = offset;

        if !self.is_consistent() {
            warn!(contract_id = %self.contract_id, "order book inconsistency detected (crossed book)");
        }

        self.prune();
        Ok(())
    }

    /// Reset tracking to accept the next delta unconditionally, used
    /// after a fresh snapshot arrives following a gap. Per the recovery
    /// policy, the gap detector is rebased on the sequence that triggered
    /// the gap rather than the (possibly stale) snapshot's own offset, so
    /// the very next live delta is not immediately treated as a new gap.
    pub fn rebase_after_gap(&mut self, triggering_offset: u64) {
        self.offset = triggering_offset.saturating_sub(1);
        self.state = BookState::Live;
    }

    fn upsert(&mut self, is_bid: bool, level: BookLevel) {
        let side = if is_bid { &mut self.bids } else { &mut self.asks };
        if level.size.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.size);
        }
    }

    fn is_consistent(&self) -> bool {
        match (self.bids.keys().next_back(), self.asks.keys().next()) {
            (Some(best_bid), Some(best_ask)) => best_bid < best_ask,
            _ => true,
        }
    }

    fn prune(&mut self) {
        while self.bids.len() > MAX_LEVELS_PER_SIDE {
            if let Some(&worst) = self.bids.keys().next() {
                self.bids.remove(&worst);
            }
        }
        while self.asks.len() > MAX_LEVELS_PER_SIDE {
            if let Some(&worst) = self.asks.keys().next_back() {
                self.asks.remove(&worst);
            }
        }
    }

    /// Best bid/ask after excluding dust levels below `NOTIONAL_MIN`.
    /// Returns `None` for a side with no qualifying level.
    pub fn best_bid(&self) -> Option<Decimal> {
        let min_notional = Decimal::from(NOTIONAL_MIN);
        self.bids
            .iter()
            .rev()
            .find(|(price, size)| *price * **size >= min_notional)
            .map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        let min_notional = Decimal::from(NOTIONAL_MIN);
        self.asks
            .iter()
            .find(|(price, size)| *price * **size >= min_notional)
            .map(|(price, _)| *price)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_live(&self) -> bool {
        self.state == BookState::Live
    }
}

/// Exponential reconnect backoff capped at 30s, starting at 1s.
pub fn reconnect_backoff(attempt: u32) -> std::time::Duration {
    let secs = 1u64.saturating_mul(1 << attempt.min(5));
    std::time::Duration::from_secs(secs.min(30))
}


/// Property-based tests for the book's sequencing and consistency
/// invariants, checked across randomized offset/level sequences rather
/// than the handful of cases a unit test can enumerate by hand.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_level(price_range: std::ops::Range<i64>) -> impl Strategy<Value = BookLevel> {
        (price_range, 1i64..5000).prop_map(|(price, size)| BookLevel {
            price: Decimal::from(price),
            size: Decimal::from(size),
        })
    }

    /// Same price range as `arb_level`, but rescaled to a random decimal
    /// scale so that same-side levels can carry differing `Decimal`
    /// scales — the case the mantissa/scale key bug missed entirely.
    fn arb_level_mixed_scale(price_range: std::ops::Range<i64>) -> impl Strategy<Value = BookLevel> {
        (price_range, 0u32..4, 1i64..5000).prop_map(|(price, scale, size)| BookLevel {
            price: Decimal::new(price * 10i64.pow(scale), scale),
            size: Decimal::from(size),
        })
    }

    proptest! {
        /// Property: every delta applied cleanly advances the offset by
        /// exactly one, and a gap is reported whenever the delta's offset
        /// skips ahead of that expectation.
        #[test]
        fn prop_offset_advances_by_one_or_reports_the_gap(
            start in 1u64..1000,
            deltas in prop::collection::vec(1u64..5, 1..20),
        ) {
            let mut book = OrderBookMaintainer::new("ETH-PERP");
            book.apply_snapshot(start, vec![], vec![]);
            let mut expected = start;

            for step in deltas {
                let next_offset = expected + step;
                let result = book.apply_delta(next_offset, vec![], vec![]);
                if step == 1 {
                    prop_assert_eq!(result, Ok(()));
                    prop_assert_eq!(book.offset(), next_offset);
                    expected = next_offset;
                } else {
                    prop_assert_eq!(result, Err(step - 1));
                    prop_assert_eq!(book.state(), BookState::GapDetected);
                    book.rebase_after_gap(next_offset);
                    expected = next_offset;
                }
            }
        }

        /// Property: whenever both sides are non-empty after an apply,
        /// the best bid is strictly below the best ask.
        #[test]
        fn prop_book_never_crosses_once_consistent(
            bids in prop::collection::vec(arb_level(1..100), 0..20),
            asks in prop::collection::vec(arb_level(101..200), 0..20),
        ) {
            let mut book = OrderBookMaintainer::new("ETH-PERP");
            book.apply_snapshot(1, bids, asks);
            prop_assert!(book.is_consistent());
        }

        /// Same no-cross property, but with same-side levels at mixed
        /// `Decimal` scales — catches a key type that sorts by mantissa
        /// instead of true numeric value.
        #[test]
        fn prop_book_never_crosses_with_mixed_scale_levels(
            bids in prop::collection::vec(arb_level_mixed_scale(1..100), 0..20),
            asks in prop::collection::vec(arb_level_mixed_scale(101..200), 0..20),
        ) {
            let mut book = OrderBookMaintainer::new("ETH-PERP");
            book.apply_snapshot(1, bids, asks);
            prop_assert!(book.is_consistent());
        }

        /// Property: best bid/ask are the true numeric maximum/minimum of
        /// the qualifying levels on each side, independent of the scale
        /// any individual level's price happens to be represented at.
        #[test]
        fn prop_best_levels_match_true_numeric_extremes(
            bids in prop::collection::vec(arb_level_mixed_scale(1..100), 1..20),
        ) {
            let mut book = OrderBookMaintainer::new("ETH-PERP");
            let boosted: Vec<_> = bids
                .iter()
                .map(|l| BookLevel { price: l.price, size: l.size * Decimal::from(1000) })
                .collect();
            let expected_max = boosted.iter().map(|l| l.price).max();
            book.apply_snapshot(1, boosted, vec![]);
            prop_assert_eq!(book.best_bid(), expected_max);
        }

        /// Property: a snapshot fully replaces prior state — applying a
        /// snapshot after arbitrary deltas yields the same best bid/ask
        /// as applying that snapshot to a fresh book.
        #[test]
        fn prop_snapshot_replaces_prior_state(
            noise in prop::collection::vec(arb_level(1..100), 0..10),
            bids in prop::collection::vec(arb_level(1..100), 0..20),
            asks in prop::collection::vec(arb_level(101..200), 0..20),
        ) {
            let mut dirty = OrderBookMaintainer::new("ETH-PERP");
            dirty.apply_snapshot(1, noise, vec![]);
            dirty.apply_snapshot(2, bids.clone(), asks.clone());

            let mut fresh = OrderBookMaintainer::new("ETH-PERP");
            fresh.apply_snapshot(2, bids, asks);

            prop_assert_eq!(dirty.best_bid(), fresh.best_bid());
            prop_assert_eq!(dirty.best_ask(), fresh.best_ask());
        }
    }
}
