//! Position & risk model: single-position book, cost model, risk exits.

pub mod book;
pub mod cost;
pub mod rules;

pub use book::{close_order, PendingOpen, PositionBook};
pub use cost::CostModel;
pub use rules::RiskRules;
