//! Gap filling for numeric series.

use super::window::FeatureRow;

/// Forward-fill, then back-fill leading gaps; an all-missing series becomes zeros.
///
/// Non-finite values count as missing.
pub fn impute_series(values: &[Option<f64>]) -> Vec<f64> {
    let mut out: Vec<Option<f64>> = Vec::with_capacity(values.len());
    let mut last = None;
    for v in values {
        let v = v.filter(|x| x.is_finite());
        if v.is_some() {
            last = v;
        }
        out.push(last);
    }

    let first = out.iter().flatten().next().copied();
    out.into_iter()
        .map(|v| v.or(first).unwrap_or(0.0))
        .collect()
}

/// Impute the market columns (price, market cap, volume, 24h change) of a
/// row sequence in place. Sentiment columns are left as they are.
pub fn fill_market_gaps(rows: &mut [FeatureRow]) {
    for col in 0..FeatureRow::MARKET_COLUMNS {
        let raw: Vec<Option<f64>> = rows.iter().map(|r| r.raw[col]).collect();
        for (row, v) in rows.iter_mut().zip(impute_series(&raw)) {
            row.raw[col] = Some(v);
        }
    }
}
