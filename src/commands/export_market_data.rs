use crate::data_context::MarketData;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(input_path: &Path, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let market_data = MarketData::load_from_file(input_path)?;
    market_data.save_snapshot(output_path)?;
    info!(
        "Market data snapshot with {} bars for {} written to {}",
        market_data.len(),
        market_data.symbol(),
        output_path.display()
    );

    Ok(())
}
