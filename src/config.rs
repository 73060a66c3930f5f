//! Analysis settings loaded from an optional JSON file
//!
//! Every key is optional and unknown keys are ignored, so a partial file
//! only overrides what it names.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::data::{month_index, weekday_index, TimeOfDay};
use crate::error::{AnalysisError, AnalysisResult};
use crate::forecast::SeasonalArForecaster;
use crate::holidays::us_federal_calendar;
use crate::pricing::{PriceGrid, PriceScenario};
use crate::promotion::{MarginMap, MarginScenario};

/// Approximate cost per drink
const DEFAULT_UNIT_COSTS: [(&str, f64); 8] = [
    ("Latte", 20.0),
    ("Cappuccino", 18.0),
    ("Flat White", 19.0),
    ("Hot Chocolate", 15.0),
    ("Cocoa", 15.0),
    ("Americano", 10.0),
    ("Americano with Milk", 12.0),
    ("Cortado", 14.0),
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    /// Trailing window for the daily promotion trend
    pub rolling_window: usize,
    /// Margin for products missing from `profit_margins`
    pub default_margin: f64,
    pub price_min_factor: f64,
    pub price_max_factor: f64,
    pub grid_size: usize,
    pub profit_margins: BTreeMap<String, f64>,
    /// Scenario label -> multiplier applied to every margin
    pub profit_multipliers: BTreeMap<String, f64>,
    pub rolling_windows: Vec<usize>,
    pub unit_costs: BTreeMap<String, f64>,
    pub default_unit_cost: f64,
    pub scenario: ScenarioConfig,
    /// Years whose US federal holidays count as holidays; empty disables them
    pub holiday_years: Vec<i32>,
    /// Extra holiday dates on top of the federal calendar
    pub holidays: Vec<NaiveDate>,
    pub clusters: usize,
    pub tree_max_depth: usize,
    pub forest_size: usize,
    pub forest_max_depth: usize,
    /// Share of rows held out when evaluating classifiers
    pub test_ratio: f64,
    pub forecast: ForecastConfig,
}

/// History lengths and model shape for the sales forecasts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Trailing calendar days the next-day forecast trains on
    pub training_days: usize,
    pub months_back: usize,
    pub weeks_back: usize,
    /// Autoregressive lags on the differenced series
    pub ar_order: usize,
    /// Seasonal lag in steps; 0 disables it
    pub seasonal_period: usize,
    pub penalty: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            training_days: 365,
            months_back: 12,
            weeks_back: 4,
            ar_order: 1,
            seasonal_period: 12,
            penalty: 0.1,
        }
    }
}

impl ForecastConfig {
    pub fn forecaster(&self) -> SeasonalArForecaster {
        SeasonalArForecaster {
            order: self.ar_order,
            seasonal_period: self.seasonal_period,
            penalty: self.penalty,
        }
    }
}

/// Calendar context the price optimizer evaluates
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub weekday: String,
    pub month: String,
    pub time_of_day: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            weekday: "Fri".to_string(),
            month: "Mar".to_string(),
            time_of_day: "Morning".to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("Coffe_sales.csv"),
            rolling_window: 7,
            default_margin: 2.0,
            price_min_factor: 0.8,
            price_max_factor: 1.2,
            grid_size: 30,
            profit_margins: BTreeMap::new(),
            profit_multipliers: [("base", 1.0), ("lowered", 0.8), ("raised", 1.2)]
                .into_iter()
                .map(|(label, m)| (label.to_string(), m))
                .collect(),
            rolling_windows: vec![3, 7, 14, 30],
            unit_costs: DEFAULT_UNIT_COSTS
                .into_iter()
                .map(|(name, cost)| (name.to_string(), cost))
                .collect(),
            default_unit_cost: 15.0,
            scenario: ScenarioConfig::default(),
            holiday_years: vec![2024, 2025],
            holidays: Vec::new(),
            clusters: 3,
            tree_max_depth: 5,
            forest_size: 50,
            forest_max_depth: 15,
            test_ratio: 0.3,
            forecast: ForecastConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load and validate the configuration
    ///
    /// With no path the built-in defaults are used.
    pub fn load(path: Option<&Path>) -> AnalysisResult<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    AnalysisError::Configuration(format!(
                        "cannot read config file {}: {e}",
                        path.display()
                    ))
                })?;
                let config = Self::from_json(&raw)?;
                debug!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> AnalysisResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AnalysisError::Configuration(format!("malformed config: {e}")))
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        if self.rolling_window == 0 {
            return Err(invalid("rolling_window must be at least 1"));
        }
        if self.rolling_windows.iter().any(|&w| w == 0) {
            return Err(invalid("rolling_windows entries must be at least 1"));
        }
        self.price_grid()?;
        if self.default_margin < 0.0 || self.profit_margins.values().any(|&m| m < 0.0) {
            return Err(invalid("profit margins must be non-negative"));
        }
        if self.profit_multipliers.values().any(|&m| m < 0.0) {
            return Err(invalid("profit multipliers must be non-negative"));
        }
        self.price_scenario()?;
        if self.clusters == 0 {
            return Err(invalid("clusters must be at least 1"));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(invalid("test_ratio must lie strictly between 0 and 1"));
        }
        if self.forest_size == 0 {
            return Err(invalid("forest_size must be at least 1"));
        }
        let forecast = &self.forecast;
        if forecast.training_days < 2 || forecast.months_back < 2 || forecast.weeks_back < 2 {
            return Err(invalid("forecast history lengths must be at least 2"));
        }
        if forecast.ar_order == 0 && forecast.seasonal_period == 0 {
            return Err(invalid("forecast needs ar_order or seasonal_period"));
        }
        if forecast.penalty < 0.0 {
            return Err(invalid("forecast penalty must be non-negative"));
        }
        Ok(())
    }

    pub fn price_grid(&self) -> AnalysisResult<PriceGrid> {
        PriceGrid::new(self.price_min_factor, self.price_max_factor, self.grid_size)
    }

    pub fn price_scenario(&self) -> AnalysisResult<PriceScenario> {
        let ScenarioConfig {
            weekday,
            month,
            time_of_day,
        } = &self.scenario;
        if weekday_index(weekday).is_none() {
            return Err(invalid(&format!("unknown weekday '{weekday}'")));
        }
        if month_index(month).is_none() {
            return Err(invalid(&format!("unknown month '{month}'")));
        }
        let time_of_day: TimeOfDay = time_of_day.parse()?;
        Ok(PriceScenario::new(weekday.clone(), month.clone(), time_of_day))
    }

    pub fn margins(&self) -> MarginMap {
        MarginMap::new(self.profit_margins.clone(), self.default_margin)
    }

    /// One margin scenario per configured multiplier, in label order
    pub fn margin_scenarios(&self) -> Vec<MarginScenario> {
        let base = self.margins();
        self.profit_multipliers
            .iter()
            .map(|(label, &multiplier)| MarginScenario::new(label.clone(), base.scaled(multiplier)))
            .collect()
    }

    pub fn unit_cost(&self, product: &str) -> f64 {
        self.unit_costs
            .get(product)
            .copied()
            .unwrap_or(self.default_unit_cost)
    }

    pub fn holiday_set(&self) -> BTreeSet<NaiveDate> {
        let mut days = us_federal_calendar(&self.holiday_years);
        days.extend(self.holidays.iter().copied());
        days
    }
}

fn invalid(message: &str) -> AnalysisError {
    AnalysisError::Configuration(message.to_string())
}
