use crate::models::{Bar, PriceSeries};
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbol: String,
    bars: Vec<Bar>,
}

/// Column positions resolved from a CSV header.
struct CsvColumns {
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: usize,
}

impl CsvColumns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };
        let close = position("close").ok_or_else(|| anyhow!("CSV header has no close column"))?;
        Ok(Self {
            open: position("open"),
            high: position("high"),
            low: position("low"),
            close,
        })
    }

    fn parse(&self, record: &csv::StringRecord, row: usize) -> Result<Bar> {
        let field = |index: usize| -> Result<f64> {
            let raw = record
                .get(index)
                .ok_or_else(|| anyhow!("Row {} is missing column {}", row, index + 1))?;
            raw.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {} has a non-numeric value: {}", row, raw))
        };
        let close = field(self.close)?;
        let optional = |index: Option<usize>| -> Result<f64> {
            match index {
                Some(index) => field(index),
                None => Ok(close),
            }
        };
        Ok(Bar {
            open: optional(self.open)?,
            high: optional(self.high)?,
            low: optional(self.low)?,
            close,
        })
    }
}

/// Bars of one instrument, loaded from CSV or a binary snapshot.
#[derive(Clone, Debug)]
pub struct MarketData {
    symbol: String,
    bars: Arc<Vec<Bar>>,
}

impl MarketData {
    pub fn new<S: Into<String>>(symbol: S, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Arc::new(bars),
        }
    }

    /// Loads `.csv` or `.bin` by extension; the symbol defaults to the file stem.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let data = match extension.as_deref() {
            Some("csv") => Self::load_csv(path)?,
            Some("bin") => Self::load_snapshot(path)?,
            _ => {
                return Err(anyhow!(
                    "Unsupported market data file {} (expected .csv or .bin)",
                    path.display()
                ))
            }
        };
        if !data.has_data() {
            return Err(anyhow!("Market data file {} has no bars", path.display()));
        }
        info!(
            "Loaded {} bars for {} from {}",
            data.len(),
            data.symbol,
            path.display()
        );
        Ok(data)
    }

    fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open CSV at {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header of {}", path.display()))?
            .clone();
        let columns = CsvColumns::from_headers(&headers)
            .with_context(|| format!("Invalid CSV header in {}", path.display()))?;

        let mut bars = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("Failed to read row {} of {}", row + 1, path.display()))?;
            bars.push(columns.parse(&record, row + 1)?);
        }
        Ok(Self::new(symbol_from_path(path), bars))
    }

    fn load_snapshot(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }
        Ok(Self::new(snapshot.symbol, snapshot.bars))
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbol: self.symbol.clone(),
            bars: self.bars.as_ref().clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn has_data(&self) -> bool {
        !self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn prices(&self) -> PriceSeries {
        PriceSeries::from_bars(&self.bars)
    }
}

fn symbol_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}
