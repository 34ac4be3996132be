use common::GeneralConfig;

/// Fill-price adjustment and fee schedule shared by both execution paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub trade_fee: f64,
    pub spread: f64,
    pub slippage: f64,
}

impl CostModel {
    pub fn from_config(cfg: &GeneralConfig) -> Self {
        Self { trade_fee: cfg.trade_fee, spread: cfg.spread, slippage: cfg.slippage }
    }

    pub fn frictionless() -> Self {
        Self { trade_fee: 0.0, spread: 0.0, slippage: 0.0 }
    }

    /// Buys pay half the spread plus slippage above the quoted price.
    pub fn buy_fill(&self, price: f64) -> f64 {
        price * (1.0 + self.spread / 2.0 + self.slippage)
    }

    /// Sells receive half the spread plus slippage below the quoted price.
    pub fn sell_fill(&self, price: f64) -> f64 {
        price * (1.0 - self.spread / 2.0 - self.slippage)
    }

    /// Fees for a round trip, charged once on close.
    pub fn round_trip_fees(&self, entry_notional: f64, exit_notional: f64) -> f64 {
        self.trade_fee * (entry_notional + exit_notional)
    }

    /// Cash that can be committed to an entry while keeping its fee covered.
    pub fn available_balance(&self, balance: f64) -> f64 {
        (balance / (1.0 + self.trade_fee)).max(0.0)
    }
}
