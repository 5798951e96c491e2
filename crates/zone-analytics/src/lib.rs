//! Derived analytics over a zone's cumulative-disturbance series: growth,
//! first violation, short-horizon forecast and alert tiering.

use statrs::statistics::Statistics;

use detection_core::{AlertRecord, AlertTier, GrowthRow, TimeseriesRow};

/// Date of the first row with nonzero disturbed area.
pub fn first_violation(series: &[TimeseriesRow]) -> Option<String> {
    series
        .iter()
        .find(|row| row.area_km2 > 0.0)
        .map(|row| row.date.clone())
}

/// Row-to-row area deltas, one fewer entry than the series. Non-negative as
/// long as the cumulative mask only grows.
pub fn monthly_growth(series: &[TimeseriesRow]) -> Vec<GrowthRow> {
    series
        .windows(2)
        .map(|pair| GrowthRow {
            date: pair[1].date.clone(),
            growth_km2: pair[1].area_km2 - pair[0].area_km2,
        })
        .collect()
}

/// Ordinary least-squares fit of area against 0-based month index,
/// extrapolated one index past the last observation. Needs at least two
/// points.
pub fn predict_next(series: &[TimeseriesRow]) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }

    let xs: Vec<f64> = (0..series.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = series.iter().map(|row| row.area_km2).collect();
    let (slope, intercept) = ols_fit(&xs, &ys);

    Some(slope * series.len() as f64 + intercept)
}

fn ols_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let x_mean = xs.mean();
    let y_mean = ys.mean();

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for i in 0..xs.len() {
        let dx = xs[i] - x_mean;
        covariance += dx * (ys[i] - y_mean);
        variance += dx * dx;
    }

    if variance == 0.0 {
        return (0.0, y_mean);
    }

    let slope = covariance / variance;
    (slope, y_mean - slope * x_mean)
}

/// Disturbed share of a zone in percent. Zero for degenerate zone areas.
pub fn percentage(area_km2: f64, zone_area_km2: f64) -> f64 {
    if zone_area_km2 > 0.0 {
        (area_km2 / zone_area_km2) * 100.0
    } else {
        0.0
    }
}

/// Tier an area against its zone: untouched is `none`, under one percent is
/// `soft`, anything at or above one percent is `hard`.
pub fn classify_alert(area_km2: f64, zone_area_km2: f64) -> AlertTier {
    let pct = percentage(area_km2, zone_area_km2);
    if pct == 0.0 {
        AlertTier::None
    } else if pct < 1.0 {
        AlertTier::Soft
    } else {
        AlertTier::Hard
    }
}

/// Per-row alert log for an exclusion zone. Growth is measured against the
/// previous row, starting from zero.
pub fn build_alert_log(series: &[TimeseriesRow], zone_area_km2: f64) -> Vec<AlertRecord> {
    let mut log = Vec::with_capacity(series.len());
    let mut prev_area = 0.0;

    for row in series {
        log.push(AlertRecord {
            date: row.date.clone(),
            area_km2: row.area_km2,
            growth_km2: row.area_km2 - prev_area,
            alert: classify_alert(row.area_km2, zone_area_km2),
        });
        prev_area = row.area_km2;
    }

    log
}
