pub mod error_conditions;
pub mod full_trade_lifecycle;
pub mod update_prices;
