use async_trait::async_trait;

use crate::{OrderRequest, Result, Validation};

/// Broker-side dry-run validation of a simulated order.
///
/// The paper-trading loop calls this before committing any automatic or manual
/// transition. A `Rejected` outcome rolls the attempted transition back; an
/// `Err` is treated the same way by the caller.
#[async_trait]
pub trait OrderValidator: Send + Sync {
    async fn validate_order(&self, order: &OrderRequest) -> Result<Validation>;
}

/// Accepts every order. The backtest path uses this.
pub struct AcceptAll;

#[async_trait]
impl OrderValidator for AcceptAll {
    async fn validate_order(&self, _order: &OrderRequest) -> Result<Validation> {
        Ok(Validation::Accepted)
    }
}
