//! Profit-maximizing price search over an injected demand model

use ndarray::Array1;
use tracing::{debug, warn};

use crate::aggregate::{products, DailyProductAggregate, ProductBaseline};
use crate::data::TimeOfDay;
use crate::error::{AnalysisError, AnalysisResult};

/// One feature row handed to a demand model
#[derive(Debug, Clone, PartialEq)]
pub struct DemandFeatures {
    pub product: String,
    pub weekday: String,
    pub month: String,
    pub time_of_day: TimeOfDay,
    pub price: f64,
    pub milk_ratio: f64,
}

impl From<&DailyProductAggregate> for DemandFeatures {
    fn from(row: &DailyProductAggregate) -> Self {
        Self {
            product: row.product.clone(),
            weekday: row.weekday.clone(),
            month: row.month.clone(),
            time_of_day: row.time_of_day,
            price: row.avg_price,
            milk_ratio: row.avg_milk_ratio,
        }
    }
}

/// Anything able to predict daily unit demand for feature rows
///
/// Implementations must encode rows exactly as they were encoded when the
/// model was trained; a mismatch yields wrong predictions, not errors.
pub trait DemandModel {
    fn predict(&self, rows: &[DemandFeatures]) -> AnalysisResult<Vec<f64>>;
}

/// Calendar context a price is evaluated in
#[derive(Debug, Clone, PartialEq)]
pub struct PriceScenario {
    pub weekday: String,
    pub month: String,
    pub time_of_day: TimeOfDay,
}

impl PriceScenario {
    pub fn new(weekday: impl Into<String>, month: impl Into<String>, time_of_day: TimeOfDay) -> Self {
        Self {
            weekday: weekday.into(),
            month: month.into(),
            time_of_day,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {}, {}", self.weekday, self.time_of_day, self.month)
    }
}

/// Candidate prices as multiples of the historical mean price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceGrid {
    min_factor: f64,
    max_factor: f64,
    size: usize,
}

impl Default for PriceGrid {
    fn default() -> Self {
        Self {
            min_factor: 0.8,
            max_factor: 1.2,
            size: 30,
        }
    }
}

impl PriceGrid {
    pub fn new(min_factor: f64, max_factor: f64, size: usize) -> AnalysisResult<Self> {
        if !(min_factor > 0.0 && min_factor <= max_factor && max_factor.is_finite()) {
            return Err(AnalysisError::Configuration(format!(
                "price factors must satisfy 0 < min <= max (got {min_factor}, {max_factor})"
            )));
        }
        if size < 2 {
            return Err(AnalysisError::Configuration(format!(
                "price grid needs at least 2 points (got {size})"
            )));
        }
        Ok(Self {
            min_factor,
            max_factor,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Evenly spaced prices around `current_price`, both ends inclusive
    pub fn prices(&self, current_price: f64) -> Array1<f64> {
        Array1::linspace(
            current_price * self.min_factor,
            current_price * self.max_factor,
            self.size,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceCandidate {
    pub price: f64,
    pub predicted_units: f64,
    /// `(price - unit_cost) * predicted_units`, negative demand included
    pub predicted_profit: f64,
}

/// Outcome of one optimization call
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecommendation {
    pub product: String,
    pub current_price: f64,
    pub unit_cost: f64,
    /// Candidates in ascending price order
    pub candidates: Vec<PriceCandidate>,
    pub best: PriceCandidate,
}

/// Recommend the profit-maximizing price for a product under a scenario
///
/// # Arguments
/// * `product` - Product to price; must appear in `aggregates`
/// * `aggregates` - Historical daily aggregates
/// * `model` - Demand model predicting units per feature row
/// * `scenario` - Weekday, month and time of day to evaluate
/// * `grid` - Candidate price grid
///
/// # Returns
/// * Every candidate plus the best one (lowest price on ties)
pub fn recommend_price<M>(
    product: &str,
    aggregates: &[DailyProductAggregate],
    model: &M,
    scenario: &PriceScenario,
    grid: &PriceGrid,
) -> AnalysisResult<PriceRecommendation>
where
    M: DemandModel + ?Sized,
{
    let baseline = ProductBaseline::from_aggregates(product, aggregates)?;
    let prices = grid.prices(baseline.current_price);

    let rows: Vec<DemandFeatures> = prices
        .iter()
        .map(|&price| DemandFeatures {
            product: product.to_string(),
            weekday: scenario.weekday.clone(),
            month: scenario.month.clone(),
            time_of_day: scenario.time_of_day,
            price,
            milk_ratio: baseline.avg_milk_ratio,
        })
        .collect();

    let predicted = model.predict(&rows)?;
    if predicted.len() != rows.len() {
        return Err(AnalysisError::Model(format!(
            "demand model returned {} predictions for {} rows",
            predicted.len(),
            rows.len()
        )));
    }

    let candidates: Vec<PriceCandidate> = prices
        .iter()
        .zip(predicted)
        .map(|(&price, units)| PriceCandidate {
            price,
            predicted_units: units,
            predicted_profit: (price - baseline.unit_cost) * units,
        })
        .collect();

    if candidates.iter().any(|c| c.predicted_units < 0.0) {
        warn!(product, "Demand model predicted negative units for some prices");
    }

    let best = best_candidate(&candidates)
        .ok_or_else(|| AnalysisError::EmptyResult(format!("no finite profit for '{product}'")))?;

    debug!(
        product,
        current_price = baseline.current_price,
        best_price = best.price,
        best_profit = best.predicted_profit,
        "Price grid evaluated"
    );

    Ok(PriceRecommendation {
        product: product.to_string(),
        current_price: baseline.current_price,
        unit_cost: baseline.unit_cost,
        candidates,
        best,
    })
}

/// First candidate holding the maximum finite profit
fn best_candidate(candidates: &[PriceCandidate]) -> Option<PriceCandidate> {
    candidates
        .iter()
        .filter(|c| c.predicted_profit.is_finite())
        .fold(None, |best: Option<PriceCandidate>, c| match best {
            Some(b) if b.predicted_profit >= c.predicted_profit => Some(b),
            _ => Some(*c),
        })
}

/// Best price for every product in the table, ranked by predicted profit
pub fn recommend_all_prices<M>(
    aggregates: &[DailyProductAggregate],
    model: &M,
    scenario: &PriceScenario,
    grid: &PriceGrid,
) -> AnalysisResult<Vec<PriceRecommendation>>
where
    M: DemandModel + ?Sized,
{
    let mut recommendations = products(aggregates)
        .iter()
        .map(|product| recommend_price(product, aggregates, model, scenario, grid))
        .collect::<AnalysisResult<Vec<_>>>()?;

    recommendations.sort_by(|a, b| b.best.predicted_profit.total_cmp(&a.best.predicted_profit));
    Ok(recommendations)
}
