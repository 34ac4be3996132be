use async_trait::async_trait;
use tracing::debug;

use common::{OrderRequest, OrderValidator, PaperConfig, RejectionReason, Result, Side, Validation};

/// Dry-run broker checks applied before any simulated transition commits.
///
/// Price must be finite and positive and volume must reach the minimum trade
/// size. The minimum notional applies to entries only, so an open position
/// can always be closed.
#[derive(Debug, Clone)]
pub struct DryRunValidator {
    min_volume: f64,
    min_notional: f64,
}

impl DryRunValidator {
    pub fn new(min_volume: f64, min_notional: f64) -> Self {
        Self { min_volume, min_notional }
    }

    pub fn from_config(cfg: &PaperConfig) -> Self {
        Self::new(cfg.min_trade_volume, cfg.min_order_notional)
    }

    fn check(&self, order: &OrderRequest) -> Validation {
        if !(order.price.is_finite() && order.price > 0.0) {
            return Validation::Rejected(RejectionReason::InvalidPrice);
        }
        if !order.volume.is_finite() || order.volume < self.min_volume {
            return Validation::Rejected(RejectionReason::BelowMinimumVolume);
        }
        if order.side == Side::Buy && order.notional() < self.min_notional {
            return Validation::Rejected(RejectionReason::BelowMinimumNotional);
        }
        Validation::Accepted
    }
}

#[async_trait]
impl OrderValidator for DryRunValidator {
    async fn validate_order(&self, order: &OrderRequest) -> Result<Validation> {
        let outcome = self.check(order);
        debug!(side = %order.side, price = order.price, volume = order.volume, ?outcome, "Dry-run validation");
        Ok(outcome)
    }
}
