use crate::core::TimelineRow;
use crate::error::{ProjectionError, Result};

const HEADER: [&str; 11] = [
    "age",
    "start_balance_nominal",
    "contributions",
    "liquidity_net",
    "withdrawals",
    "fees",
    "taxes",
    "growth",
    "end_balance_nominal",
    "cpi_index",
    "end_balance_real",
];

/// Renders the deterministic timeline as comma-separated text with a header.
pub fn timeline_csv(rows: &[TimelineRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).map_err(export_err)?;

    for row in rows {
        writer
            .write_record([
                row.age.to_string(),
                row.start_balance_nominal.to_string(),
                row.contributions.to_string(),
                row.liquidity_net.to_string(),
                row.withdrawals.to_string(),
                row.fees.to_string(),
                row.taxes.to_string(),
                row.growth.to_string(),
                row.end_balance_nominal.to_string(),
                row.cpi_index.to_string(),
                row.end_balance_real.to_string(),
            ])
            .map_err(export_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ProjectionError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ProjectionError::Export(e.to_string()))
}

fn export_err(err: csv::Error) -> ProjectionError {
    ProjectionError::Export(err.to_string())
}
