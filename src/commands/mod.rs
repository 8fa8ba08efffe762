pub mod backtest;
pub mod export_market_data;
pub mod optimize;
pub mod optimize_batch;
