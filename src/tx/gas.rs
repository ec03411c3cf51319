//! Gas price handling for replacement retries

use ethers::types::U256;

/// Gas price policy applied to underpriced replacements
#[derive(Debug, Clone, Copy)]
pub struct GasPolicy {
    /// Multiplier in percent (110 = +10%)
    bump_percent: u64,
}

impl GasPolicy {
    pub fn new(bump_percent: u64) -> Self {
        Self { bump_percent }
    }

    /// Raised gas price for a replacement of a transaction priced at `current`.
    ///
    /// Integer arithmetic; always strictly greater than `current` so that a
    /// tiny price still moves.
    pub fn bump(&self, current: U256) -> U256 {
        let bumped = current.saturating_mul(U256::from(self.bump_percent)) / 100;
        if bumped > current {
            bumped
        } else {
            current.saturating_add(U256::one())
        }
    }
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self::new(110)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_by_ten_percent() {
        let gwei = U256::from(1_000_000_000u64);
        assert_eq!(GasPolicy::default().bump(gwei * 20), gwei * 22);
    }

    #[test]
    fn small_prices_still_increase() {
        let policy = GasPolicy::default();
        assert_eq!(policy.bump(U256::zero()), U256::one());
        assert_eq!(policy.bump(U256::from(5)), U256::from(6));
    }

    #[test]
    fn custom_factor() {
        assert_eq!(GasPolicy::new(125).bump(U256::from(400)), U256::from(500));
    }
}
