//! Daily promotion targets from rolling sales trends and profit margins

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ndarray::ArrayView1;
use tracing::{debug, info};

use crate::aggregate::{calendar_product_matrix, SalesMatrix};
use crate::data::Transaction;
use crate::error::{AnalysisError, AnalysisResult};

/// Profit per unit by product with an explicit fallback
#[derive(Debug, Clone, PartialEq)]
pub struct MarginMap {
    margins: BTreeMap<String, f64>,
    default_margin: f64,
}

impl MarginMap {
    pub fn new(margins: BTreeMap<String, f64>, default_margin: f64) -> Self {
        Self {
            margins,
            default_margin,
        }
    }

    /// Margin of `product`, or the default margin when unlisted
    pub fn resolve(&self, product: &str) -> f64 {
        self.margins
            .get(product)
            .copied()
            .unwrap_or(self.default_margin)
    }

    pub fn default_margin(&self) -> f64 {
        self.default_margin
    }

    /// Every margin, the default included, multiplied by `multiplier`
    pub fn scaled(&self, multiplier: f64) -> Self {
        Self {
            margins: self
                .margins
                .iter()
                .map(|(name, margin)| (name.clone(), margin * multiplier))
                .collect(),
            default_margin: self.default_margin * multiplier,
        }
    }
}

/// A labelled margin map evaluated by [`analyze_scenarios`]
#[derive(Debug, Clone, PartialEq)]
pub struct MarginScenario {
    pub label: String,
    pub margins: MarginMap,
}

impl MarginScenario {
    pub fn new(label: impl Into<String>, margins: MarginMap) -> Self {
        Self {
            label: label.into(),
            margins,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionRecommendation {
    pub date: NaiveDate,
    pub product: String,
    pub score: f64,
}

/// Recommendations of one (scenario, window) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub key: String,
    pub label: String,
    pub window: usize,
    pub recommendations: Vec<PromotionRecommendation>,
}

pub fn scenario_key(label: &str, window: usize) -> String {
    format!("{label}_profit_margin__{window}d_rolling")
}

/// Recommend which product to promote each day
///
/// Each product is scored by how far its sales fall below the best rolling
/// trend of the day, weighted by margin. When no product scores above zero
/// the margins alone decide. Gaps are used as computed, without clamping.
///
/// # Arguments
/// * `matrix` - Units sold per day (rows, chronological) and product
/// * `margins` - Profit margin per product
/// * `rolling_window` - Trailing days in the trend mean
///
/// # Returns
/// * One recommendation per day, in day order
pub fn recommend_promotions(
    matrix: &SalesMatrix,
    margins: &MarginMap,
    rolling_window: usize,
) -> AnalysisResult<Vec<PromotionRecommendation>> {
    if rolling_window == 0 {
        return Err(AnalysisError::Configuration("rolling window must be at least 1".into()));
    }
    if matrix.days().is_empty() {
        return Ok(Vec::new());
    }
    if matrix.products().is_empty() {
        return Err(AnalysisError::EmptyResult("sales matrix has no products".into()));
    }

    let product_margins: Vec<f64> = matrix.products().iter().map(|p| margins.resolve(p)).collect();
    let trend = matrix.rolling_mean(rolling_window);

    let mut plan = Vec::with_capacity(matrix.days().len());
    for (day_idx, &date) in matrix.days().iter().enumerate() {
        let today = matrix.values().row(day_idx);
        let max_trend = trend
            .row(day_idx)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        let mut scores: Vec<f64> = today
            .iter()
            .zip(&product_margins)
            .map(|(&actual, &margin)| (max_trend - actual) * margin)
            .collect();
        if scores.iter().all(|&s| s <= 0.0) {
            scores = product_margins.clone();
        }

        let (best, score) = first_argmax(ArrayView1::from(&scores))
            .ok_or_else(|| AnalysisError::EmptyResult(format!("no score for {date}")))?;
        plan.push(PromotionRecommendation {
            date,
            product: matrix.products()[best].clone(),
            score,
        });
    }

    debug!(days = plan.len(), rolling_window, "Daily promotions scored");
    Ok(plan)
}

/// Recommend the most profitable product per day for every scenario and window
///
/// Daily profit sums each transaction's scenario margin over every calendar
/// day from the first to the last sale, zero on days without sales. Windows
/// above one day use a trailing cumulative sum over calendar days. Outcomes
/// follow the request order.
pub fn analyze_scenarios(
    transactions: &[Transaction],
    scenarios: &[MarginScenario],
    rolling_windows: &[usize],
) -> AnalysisResult<Vec<ScenarioOutcome>> {
    let mut outcomes = Vec::with_capacity(scenarios.len() * rolling_windows.len());
    for scenario in scenarios {
        let profits = calendar_product_matrix(transactions, |t| scenario.margins.resolve(&t.product))?;

        for &window in rolling_windows {
            let key = scenario_key(&scenario.label, window);
            if window == 0 {
                return Err(AnalysisError::Configuration(format!(
                    "{key}: rolling window must be at least 1"
                )));
            }
            if profits.is_empty() {
                return Err(AnalysisError::EmptyResult(format!("{key}: no daily profit to rank")));
            }

            let rolled = if window > 1 {
                profits.rolling_sum(window)
            } else {
                profits.values().clone()
            };

            let recommendations = profits
                .days()
                .iter()
                .enumerate()
                .map(|(day_idx, &date)| {
                    let (best, score) = first_argmax(rolled.row(day_idx))
                        .ok_or_else(|| AnalysisError::EmptyResult(format!("{key}: nothing to rank on {date}")))?;
                    Ok(PromotionRecommendation {
                        date,
                        product: profits.products()[best].clone(),
                        score,
                    })
                })
                .collect::<AnalysisResult<Vec<_>>>()?;

            info!(scenario = %key, days = recommendations.len(), "Scenario evaluated");
            outcomes.push(ScenarioOutcome {
                key,
                label: scenario.label.clone(),
                window,
                recommendations,
            });
        }
    }
    Ok(outcomes)
}

/// Index and value of the first maximum, ignoring NaN
fn first_argmax(values: ArrayView1<f64>) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// How often each product was recommended per (year, month)
pub fn monthly_frequency(
    recommendations: &[PromotionRecommendation],
) -> BTreeMap<(i32, u32), BTreeMap<String, usize>> {
    let mut counts: BTreeMap<(i32, u32), BTreeMap<String, usize>> = BTreeMap::new();
    for rec in recommendations {
        *counts
            .entry((rec.date.year(), rec.date.month()))
            .or_default()
            .entry(rec.product.clone())
            .or_default() += 1;
    }
    counts
}

/// The `n` most recommended products, most frequent first, ties by name
pub fn top_recommendations(recommendations: &[PromotionRecommendation], n: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for rec in recommendations {
        *counts.entry(rec.product.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}
