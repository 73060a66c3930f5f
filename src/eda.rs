//! Descriptive statistics: hour-of-day traffic, milk ratios and day-type comparison

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::debug;

use crate::data::{DayType, Transaction};
use crate::error::{AnalysisError, AnalysisResult};

/// Right-closed milk-ratio buckets of the heatmap
pub const MILK_RATIO_BUCKETS: [(f64, f64); 4] = [(0.0, 0.25), (0.25, 0.5), (0.5, 0.75), (0.75, 1.0)];

pub const TOP_PRODUCTS: usize = 5;

/// Transactions per hour of day, indexed 0..24
pub fn hourly_transaction_counts(transactions: &[Transaction]) -> [usize; 24] {
    let mut counts = [0; 24];
    for t in transactions {
        counts[t.hour() as usize] += 1;
    }
    counts
}

/// Mean milk ratio per observed hour, ascending by hour
pub fn milk_ratio_by_hour(transactions: &[Transaction]) -> AnalysisResult<Vec<(u32, f64)>> {
    if transactions.is_empty() {
        return Ok(Vec::new());
    }

    let frame = df!(
        "hour" => transactions.iter().map(|t| t.hour()).collect::<Vec<_>>(),
        "milk_ratio" => transactions.iter().map(|t| t.milk_ratio()).collect::<Vec<_>>()
    )?;
    let grouped = frame
        .lazy()
        .group_by([col("hour")])
        .agg([col("milk_ratio").mean()])
        .sort(["hour"], SortMultipleOptions::default())
        .collect()?;

    let hours = grouped.column("hour")?.u32()?.clone();
    let ratios = grouped.column("milk_ratio")?.f64()?.clone();
    Ok(hours
        .into_iter()
        .zip(ratios.into_iter())
        .filter_map(|(hour, ratio)| Some((hour?, ratio?)))
        .collect())
}

/// Transaction counts per hour and milk-ratio bucket
///
/// Rows are hours 0..24, columns follow [`MILK_RATIO_BUCKETS`]. Pure coffee
/// (ratio 0) lies outside every bucket.
pub fn milk_ratio_heatmap(transactions: &[Transaction]) -> [[usize; 4]; 24] {
    let mut grid = [[0; 4]; 24];
    for t in transactions {
        let ratio = t.milk_ratio();
        if let Some(bucket) = MILK_RATIO_BUCKETS
            .iter()
            .position(|&(low, high)| ratio > low && ratio <= high)
        {
            grid[t.hour() as usize][bucket] += 1;
        }
    }
    grid
}

/// Spread of individual order amounts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderValueStats {
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation, 0 below two orders
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl OrderValueStats {
    pub fn from_amounts(amounts: &[f64]) -> Option<Self> {
        if amounts.is_empty() {
            return None;
        }
        let mut sorted = amounts.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let std_dev = if n < 2 {
            0.0
        } else {
            (sorted.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        };

        Some(Self {
            mean,
            median,
            std_dev,
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductShare {
    pub product: String,
    pub count: usize,
    /// Share of the day type's orders, in percent
    pub percentage: f64,
}

/// Sales profile of one day type
#[derive(Debug, Clone, PartialEq)]
pub struct DayTypeSummary {
    pub day_type: DayType,
    pub days: usize,
    pub avg_daily_sales: f64,
    pub avg_daily_orders: f64,
    pub order_values: OrderValueStats,
    pub top_products: Vec<ProductShare>,
}

/// Compare weekdays, weekends and holidays
///
/// Only day types that occur in the data are reported, in
/// [`DayType::ALL`] order.
///
/// # Arguments
/// * `transactions` - Raw transaction rows
/// * `holidays` - Dates classified as holidays ahead of weekends
pub fn day_type_summary(
    transactions: &[Transaction],
    holidays: &BTreeSet<NaiveDate>,
) -> AnalysisResult<Vec<DayTypeSummary>> {
    if transactions.is_empty() {
        return Err(AnalysisError::EmptyResult("no transactions to summarise".into()));
    }

    let mut by_type: BTreeMap<DayType, Vec<&Transaction>> = BTreeMap::new();
    for t in transactions {
        by_type
            .entry(DayType::classify(t.date, holidays))
            .or_default()
            .push(t);
    }

    let summaries: Vec<DayTypeSummary> = DayType::ALL
        .into_iter()
        .filter_map(|day_type| {
            let rows = by_type.get(&day_type)?;
            let amounts: Vec<f64> = rows.iter().map(|t| t.amount).collect();
            let order_values = OrderValueStats::from_amounts(&amounts)?;
            let days = rows.iter().map(|t| t.date).collect::<BTreeSet<_>>().len();

            Some(DayTypeSummary {
                day_type,
                days,
                avg_daily_sales: amounts.iter().sum::<f64>() / days as f64,
                avg_daily_orders: rows.len() as f64 / days as f64,
                order_values,
                top_products: top_products(rows, TOP_PRODUCTS),
            })
        })
        .collect();

    debug!(day_types = summaries.len(), "Summarised day types");
    Ok(summaries)
}

/// Most ordered products with their share, ties broken by name
fn top_products(rows: &[&Transaction], n: usize) -> Vec<ProductShare> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in rows {
        *counts.entry(t.product.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(n)
        .map(|(product, count)| ProductShare {
            product: product.to_string(),
            count,
            percentage: count as f64 / rows.len() as f64 * 100.0,
        })
        .collect()
}
