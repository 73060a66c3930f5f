//! Next-day sales and next-period best-seller forecasts over an injected forecaster

use chrono::{Datelike, Duration, NaiveDate};
use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{s, Array1, Array2, Axis};
use tracing::{debug, info, warn};

use crate::aggregate::{calendar_product_matrix, daily_sales, SalesMatrix};
use crate::data::Transaction;
use crate::error::{AnalysisError, AnalysisResult};

/// Fewest lagged rows a forecaster is fitted on
const MIN_TRAINING_ROWS: usize = 2;

/// Anything able to extend a chronological series by one step
pub trait Forecaster {
    fn forecast_next(&self, series: &[f64]) -> AnalysisResult<f64>;
}

/// Seasonal autoregression on the first-differenced series
///
/// The next difference is a ridge regression over the previous `order`
/// differences plus the one `seasonal_period` steps back. Lags the series is
/// too short to train on are dropped; when none is left the fit fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalArForecaster {
    pub order: usize,
    pub seasonal_period: usize,
    pub penalty: f64,
}

impl Default for SeasonalArForecaster {
    fn default() -> Self {
        Self {
            order: 1,
            seasonal_period: 12,
            penalty: 0.1,
        }
    }
}

impl SeasonalArForecaster {
    fn lags(&self, n_diffs: usize) -> Vec<usize> {
        let mut lags: Vec<usize> = (1..=self.order).collect();
        if self.seasonal_period > self.order {
            lags.push(self.seasonal_period);
        }
        lags.retain(|&lag| n_diffs >= lag + MIN_TRAINING_ROWS);
        lags
    }
}

impl Forecaster for SeasonalArForecaster {
    fn forecast_next(&self, series: &[f64]) -> AnalysisResult<f64> {
        let last = *series
            .last()
            .ok_or_else(|| AnalysisError::EmptyResult("nothing to forecast from".into()))?;
        let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
        let lags = self.lags(diffs.len());
        let Some(&max_lag) = lags.iter().max() else {
            return Err(AnalysisError::Model(format!(
                "series of {} points is too short to fit",
                series.len()
            )));
        };

        let n_rows = diffs.len() - max_lag;
        let records = Array2::from_shape_fn((n_rows, lags.len()), |(row, j)| diffs[row + max_lag - lags[j]]);
        let targets: Array1<f64> = diffs[max_lag..].iter().copied().collect();

        let model = ElasticNet::<f64>::params()
            .penalty(self.penalty)
            .l1_ratio(0.0)
            .fit(&Dataset::new(records, targets))
            .map_err(|e| AnalysisError::Model(e.to_string()))?;

        let next_row = Array1::from_iter(lags.iter().map(|&lag| diffs[diffs.len() - lag])).insert_axis(Axis(0));
        let next_diff = model.predict(&next_row)[0];
        debug!(lags = ?lags, rows = n_rows, next_diff, "Forecaster fitted");
        Ok(last + next_diff)
    }
}

/// Predicted total sales for the day after the history
#[derive(Debug, Clone, PartialEq)]
pub struct SalesForecast {
    /// Calendar-filled daily totals used for training
    pub history: Vec<(NaiveDate, f64)>,
    pub date: NaiveDate,
    pub predicted_sales: f64,
}

/// Forecast next-day sales from the trailing `training_days` calendar days
pub fn forecast_next_day_sales<F>(
    transactions: &[Transaction],
    forecaster: &F,
    training_days: usize,
) -> AnalysisResult<SalesForecast>
where
    F: Forecaster + ?Sized,
{
    let sales = daily_sales(transactions);
    let last_date = sales
        .last()
        .map(|(date, _)| *date)
        .ok_or_else(|| AnalysisError::EmptyResult("no daily sales to forecast".into()))?;
    let history = sales[sales.len().saturating_sub(training_days.max(1))..].to_vec();

    let amounts: Vec<f64> = history.iter().map(|(_, amount)| *amount).collect();
    let predicted_sales = forecaster.forecast_next(&amounts)?;
    let date = last_date + Duration::days(1);
    info!(%date, predicted_sales, training_days = history.len(), "Next-day sales forecast");

    Ok(SalesForecast {
        history,
        date,
        predicted_sales,
    })
}

/// Bucket size of a best-seller forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastPeriod {
    /// Weeks ending on Sunday
    Week,
    Month,
}

impl ForecastPeriod {
    /// Key day of the period holding `date`: the closing Sunday or the first of the month
    pub fn bucket(&self, date: NaiveDate) -> NaiveDate {
        match self {
            ForecastPeriod::Week => date + Duration::days(6 - date.weekday().num_days_from_monday() as i64),
            ForecastPeriod::Month => date.with_day(1).unwrap_or(date),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForecastPeriod::Week => "week",
            ForecastPeriod::Month => "month",
        }
    }
}

/// Units sold per period and product, every period from the first to the last sale
pub fn period_product_matrix(transactions: &[Transaction], period: ForecastPeriod) -> AnalysisResult<SalesMatrix> {
    let daily = calendar_product_matrix(transactions, |_| 1.0)?;

    let mut buckets: Vec<NaiveDate> = Vec::new();
    let mut rows: Vec<Array1<f64>> = Vec::new();
    for (idx, &day) in daily.days().iter().enumerate() {
        let bucket = period.bucket(day);
        match (buckets.last(), rows.last_mut()) {
            (Some(&current), Some(row)) if current == bucket => *row += &daily.values().row(idx),
            _ => {
                buckets.push(bucket);
                rows.push(daily.values().row(idx).to_owned());
            }
        }
    }

    let mut values = Array2::zeros((buckets.len(), daily.products().len()));
    for (mut out, row) in values.axis_iter_mut(Axis(0)).zip(&rows) {
        out.assign(row);
    }
    SalesMatrix::new(buckets, daily.products().to_vec(), values)
}

/// Predicted units for every product in the next period
#[derive(Debug, Clone, PartialEq)]
pub struct BestSellerForecast {
    pub period: ForecastPeriod,
    /// Periods of history each product was forecast from
    pub periods_used: usize,
    /// Product name and predicted units, in product order
    pub predictions: Vec<(String, f64)>,
    pub product: String,
    pub predicted_units: f64,
}

/// Forecast which product sells most in the next period
///
/// Each product is forecast from its last `periods_back` period counts.
/// Predictions are clamped at zero. A product with fewer than two periods,
/// no sales or a failed fit is predicted at zero. Ties go to the first
/// product in name order.
pub fn forecast_best_seller<F>(
    transactions: &[Transaction],
    forecaster: &F,
    period: ForecastPeriod,
    periods_back: usize,
) -> AnalysisResult<BestSellerForecast>
where
    F: Forecaster + ?Sized,
{
    let matrix = period_product_matrix(transactions, period)?;
    if matrix.is_empty() {
        return Err(AnalysisError::EmptyResult(format!("no {} sales to forecast", period.label())));
    }
    let start = matrix.days().len().saturating_sub(periods_back.max(1));
    let recent = matrix.values().slice(s![start.., ..]);

    let predictions: Vec<(String, f64)> = matrix
        .products()
        .iter()
        .zip(recent.axis_iter(Axis(1)))
        .map(|(product, column)| {
            let series = column.to_vec();
            let predicted = if series.len() < 2 || series.iter().sum::<f64>() == 0.0 {
                0.0
            } else {
                match forecaster.forecast_next(&series) {
                    Ok(value) => value.max(0.0),
                    Err(e) => {
                        warn!(product = %product, error = %e, "Forecast failed, predicting zero");
                        0.0
                    }
                }
            };
            (product.clone(), predicted)
        })
        .collect();

    let (product, predicted_units) = predictions
        .iter()
        .fold(None, |best: Option<&(String, f64)>, candidate| match best {
            Some(b) if b.1 >= candidate.1 => Some(b),
            _ => Some(candidate),
        })
        .cloned()
        .ok_or_else(|| AnalysisError::EmptyResult("no products to forecast".into()))?;

    info!(period = period.label(), product = %product, predicted_units, "Best seller forecast");
    Ok(BestSellerForecast {
        period,
        periods_used: recent.nrows(),
        predictions,
        product,
        predicted_units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;

    /// Repeats the last value
    struct Naive;

    impl Forecaster for Naive {
        fn forecast_next(&self, series: &[f64]) -> AnalysisResult<f64> {
            series
                .last()
                .copied()
                .ok_or_else(|| AnalysisError::EmptyResult("empty".into()))
        }
    }

    /// Extrapolates the last step, which can go negative
    struct LastStep;

    impl Forecaster for LastStep {
        fn forecast_next(&self, series: &[f64]) -> AnalysisResult<f64> {
            let n = series.len();
            Ok(2.0 * series[n - 1] - series[n - 2])
        }
    }

    struct Constant(f64);

    impl Forecaster for Constant {
        fn forecast_next(&self, _series: &[f64]) -> AnalysisResult<f64> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl Forecaster for Failing {
        fn forecast_next(&self, _series: &[f64]) -> AnalysisResult<f64> {
            Err(AnalysisError::Model("did not converge".into()))
        }
    }

    fn txn(stamp: &str, amount: f64, product: &str) -> Transaction {
        Transaction::new(parse_timestamp(stamp).unwrap(), amount, product)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Latte fading out over three months while Cortado picks up
    fn create_monthly_pattern() -> Vec<Transaction> {
        let mut rows = Vec::new();
        for (month, lattes, cortados) in [(1u32, 6, 1), (2, 4, 2), (3, 2, 3)] {
            for i in 0..lattes {
                rows.push(txn(&format!("2024-{month:02}-{:02} 09:00:00", i + 1), 35.0, "Latte"));
            }
            for i in 0..cortados {
                rows.push(txn(&format!("2024-{month:02}-{:02} 15:00:00", i + 10), 30.0, "Cortado"));
            }
        }
        rows
    }

    #[test]
    fn test_seasonal_ar_follows_trend() {
        let forecaster = SeasonalArForecaster::default();
        let trend: Vec<f64> = (1..=10).map(|i| 2.0 * i as f64).collect();
        assert!((forecaster.forecast_next(&trend).unwrap() - 22.0).abs() < 1e-6);

        let flat = vec![5.0; 8];
        assert!((forecaster.forecast_next(&flat).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_seasonal_ar_rejects_short_series() {
        let forecaster = SeasonalArForecaster::default();
        assert!(matches!(forecaster.forecast_next(&[1.0, 2.0]), Err(AnalysisError::Model(_))));
        assert!(matches!(forecaster.forecast_next(&[]), Err(AnalysisError::EmptyResult(_))));
        // Each lag needs two training rows past it
        assert_eq!(forecaster.lags(2), Vec::<usize>::new());
        assert_eq!(forecaster.lags(3), vec![1]);
        assert_eq!(forecaster.lags(14), vec![1, 12]);
    }

    #[test]
    fn test_next_day_sales_uses_calendar_days() {
        let transactions = vec![
            txn("2024-03-01 08:00:00", 30.0, "Latte"),
            txn("2024-03-03 08:00:00", 20.0, "Latte"),
            txn("2024-03-04 08:00:00", 25.0, "Latte"),
        ];
        let forecast = forecast_next_day_sales(&transactions, &Naive, 365).unwrap();
        assert_eq!(forecast.date, date(2024, 3, 5));
        assert_eq!(forecast.history.len(), 4);
        assert_eq!(forecast.history[1], (date(2024, 3, 2), 0.0));
        assert_eq!(forecast.predicted_sales, 25.0);

        let short = forecast_next_day_sales(&transactions, &Naive, 2).unwrap();
        assert_eq!(short.history.len(), 2);
        assert!(matches!(
            forecast_next_day_sales(&[], &Naive, 365),
            Err(AnalysisError::EmptyResult(_))
        ));
    }

    #[test]
    fn test_period_buckets() {
        // 2024-03-04 is a Monday, 2024-03-10 the Sunday closing its week
        assert_eq!(ForecastPeriod::Week.bucket(date(2024, 3, 4)), date(2024, 3, 10));
        assert_eq!(ForecastPeriod::Week.bucket(date(2024, 3, 10)), date(2024, 3, 10));
        assert_eq!(ForecastPeriod::Month.bucket(date(2024, 3, 31)), date(2024, 3, 1));

        let transactions = vec![
            txn("2024-01-15 08:00:00", 30.0, "Latte"),
            txn("2024-03-02 08:00:00", 30.0, "Latte"),
            txn("2024-03-03 08:00:00", 30.0, "Cortado"),
        ];
        let monthly = period_product_matrix(&transactions, ForecastPeriod::Month).unwrap();
        assert_eq!(monthly.days(), &[date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);
        assert_eq!(monthly.values().row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(monthly.values().row(2).to_vec(), vec![1.0, 1.0]);

        let weekly = period_product_matrix(&transactions, ForecastPeriod::Week).unwrap();
        assert_eq!(weekly.days().first(), Some(&date(2024, 1, 21)));
        assert_eq!(weekly.days().last(), Some(&date(2024, 3, 3)));
        assert_eq!(weekly.days().len(), 7);
    }

    #[test]
    fn test_best_seller_month() {
        let forecast = forecast_best_seller(&create_monthly_pattern(), &LastStep, ForecastPeriod::Month, 12).unwrap();
        assert_eq!(forecast.periods_used, 3);
        // Cortado 3 -> 4, Latte 2 -> 0
        assert_eq!(forecast.product, "Cortado");
        assert!((forecast.predicted_units - 4.0).abs() < 1e-9);
        assert_eq!(forecast.predictions, vec![("Cortado".to_string(), 4.0), ("Latte".to_string(), 0.0)]);
    }

    #[test]
    fn test_best_seller_fallbacks() {
        let transactions = create_monthly_pattern();

        // A failing fit predicts zero for everyone; the first product wins the tie
        let failed = forecast_best_seller(&transactions, &Failing, ForecastPeriod::Month, 12).unwrap();
        assert!(failed.predictions.iter().all(|(_, units)| *units == 0.0));
        assert_eq!(failed.product, "Cortado");

        // One period of history is too short to forecast from
        let single = forecast_best_seller(&transactions, &Naive, ForecastPeriod::Month, 1).unwrap();
        assert_eq!(single.periods_used, 1);
        assert!(single.predictions.iter().all(|(_, units)| *units == 0.0));

        // A product with no sales in the window is not forecast
        let mut late = transactions.clone();
        late.push(txn("2024-04-01 08:00:00", 30.0, "Latte"));
        late.push(txn("2024-05-01 08:00:00", 30.0, "Latte"));
        let recent = forecast_best_seller(&late, &Constant(7.0), ForecastPeriod::Month, 2).unwrap();
        assert_eq!(
            recent.predictions,
            vec![("Cortado".to_string(), 0.0), ("Latte".to_string(), 7.0)]
        );
        assert_eq!(recent.product, "Latte");

        // Negative forecasts are clamped
        let negative = forecast_best_seller(&transactions, &Constant(-3.0), ForecastPeriod::Month, 12).unwrap();
        assert!(negative.predictions.iter().all(|(_, units)| *units == 0.0));

        assert!(forecast_best_seller(&[], &Naive, ForecastPeriod::Week, 4).is_err());
    }
}
