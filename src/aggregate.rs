//! Daily aggregation of transactions into model-ready tables

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ndarray::{s, Array1, Array2, Axis};
use polars::prelude::*;
use tracing::debug;

use crate::data::{month_label, weekday_label, TimeOfDay, Transaction};
use crate::error::{AnalysisError, AnalysisResult};

/// One row per (product, day, time of day)
#[derive(Debug, Clone, PartialEq)]
pub struct DailyProductAggregate {
    pub product: String,
    pub date: NaiveDate,
    pub weekday: String,
    pub month: String,
    pub time_of_day: TimeOfDay,
    pub units_sold: u32,
    pub avg_price: f64,
    pub avg_milk_ratio: f64,
    pub unit_cost: f64,
}

/// Historical price and cost baseline for one product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductBaseline {
    pub current_price: f64,
    pub unit_cost: f64,
    pub avg_milk_ratio: f64,
}

impl ProductBaseline {
    /// Mean price, cost and milk ratio over every aggregate row of `product`
    pub fn from_aggregates(product: &str, aggregates: &[DailyProductAggregate]) -> AnalysisResult<Self> {
        let rows: Vec<_> = aggregates.iter().filter(|a| a.product == product).collect();
        if rows.is_empty() {
            return Err(AnalysisError::NotFound(product.to_string()));
        }
        let n = rows.len() as f64;
        Ok(Self {
            current_price: rows.iter().map(|r| r.avg_price).sum::<f64>() / n,
            unit_cost: rows.iter().map(|r| r.unit_cost).sum::<f64>() / n,
            avg_milk_ratio: rows.iter().map(|r| r.avg_milk_ratio).sum::<f64>() / n,
        })
    }
}

/// Distinct products of an aggregate table, sorted
pub fn products(aggregates: &[DailyProductAggregate]) -> Vec<String> {
    let mut names: Vec<String> = aggregates.iter().map(|a| a.product.clone()).collect();
    names.sort();
    names.dedup();
    names
}

/// Aggregate transactions to one row per product, day and time of day
///
/// # Arguments
/// * `transactions` - Raw transaction rows
/// * `unit_cost` - Cost lookup per product
///
/// # Returns
/// * Rows sorted by product, date and time of day
pub fn aggregate_daily<F>(transactions: &[Transaction], unit_cost: F) -> AnalysisResult<Vec<DailyProductAggregate>>
where
    F: Fn(&str) -> f64,
{
    if transactions.is_empty() {
        return Err(AnalysisError::EmptyResult("no transactions to aggregate".into()));
    }

    let frame = df!(
        "product" => transactions.iter().map(|t| t.product.as_str()).collect::<Vec<_>>(),
        "day" => transactions.iter().map(|t| t.date.num_days_from_ce()).collect::<Vec<_>>(),
        "time_of_day" => transactions.iter().map(|t| t.time_of_day().label()).collect::<Vec<_>>(),
        "money" => transactions.iter().map(|t| t.amount).collect::<Vec<_>>(),
        "milk_ratio" => transactions.iter().map(|t| t.pricing_milk_ratio()).collect::<Vec<_>>()
    )?;

    let grouped = frame
        .lazy()
        .group_by([col("product"), col("day"), col("time_of_day")])
        .agg([
            col("money").count().alias("units_sold"),
            col("money").mean().alias("avg_price"),
            col("milk_ratio").mean().alias("avg_milk_ratio"),
        ])
        .collect()?;

    let product_col = grouped.column("product")?.str()?.clone();
    let day_col = grouped.column("day")?.i32()?.clone();
    let time_col = grouped.column("time_of_day")?.str()?.clone();
    let units_col = grouped.column("units_sold")?.cast(&DataType::UInt32)?;
    let units_col = units_col.u32()?;
    let price_col = grouped.column("avg_price")?.f64()?.clone();
    let milk_col = grouped.column("avg_milk_ratio")?.f64()?.clone();

    let mut rows = Vec::with_capacity(grouped.height());
    for idx in 0..grouped.height() {
        let product = product_col.get(idx).unwrap_or_default().to_string();
        let day = day_col.get(idx).unwrap_or_default();
        let date = NaiveDate::from_num_days_from_ce_opt(day)
            .ok_or_else(|| AnalysisError::DataFormat(format!("invalid day ordinal {day}")))?;
        let time_of_day: TimeOfDay = time_col.get(idx).unwrap_or_default().parse()?;
        let unit_cost = unit_cost(&product);

        rows.push(DailyProductAggregate {
            weekday: weekday_label(date).to_string(),
            month: month_label(date).to_string(),
            product,
            date,
            time_of_day,
            units_sold: units_col.get(idx).unwrap_or_default(),
            avg_price: price_col.get(idx).unwrap_or_default(),
            avg_milk_ratio: milk_col.get(idx).unwrap_or_default(),
            unit_cost,
        });
    }

    rows.sort_by(|a, b| {
        (a.product.as_str(), a.date, a.time_of_day).cmp(&(b.product.as_str(), b.date, b.time_of_day))
    });
    debug!(rows = rows.len(), "Aggregated daily product rows");
    Ok(rows)
}

/// Day-indexed table with one zero-filled column per product
#[derive(Debug, Clone, PartialEq)]
pub struct SalesMatrix {
    days: Vec<NaiveDate>,
    products: Vec<String>,
    /// (n_days, n_products)
    values: Array2<f64>,
}

impl SalesMatrix {
    /// Build from explicit parts; days must be sorted ascending
    pub fn new(days: Vec<NaiveDate>, products: Vec<String>, values: Array2<f64>) -> AnalysisResult<Self> {
        if values.dim() != (days.len(), products.len()) {
            return Err(AnalysisError::DataFormat(format!(
                "matrix shape {:?} does not match {} days x {} products",
                values.dim(),
                days.len(),
                products.len()
            )));
        }
        if days.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalysisError::DataFormat("day index must be strictly increasing".into()));
        }
        Ok(Self {
            days,
            products,
            values,
        })
    }

    /// Build from named per-product columns
    pub fn from_columns(days: Vec<NaiveDate>, columns: Vec<(&str, Vec<f64>)>) -> AnalysisResult<Self> {
        let mut values = Array2::zeros((days.len(), columns.len()));
        let mut products = Vec::with_capacity(columns.len());
        for (j, (name, column)) in columns.into_iter().enumerate() {
            if column.len() != days.len() {
                return Err(AnalysisError::DataFormat(format!(
                    "column '{name}' has {} values for {} days",
                    column.len(),
                    days.len()
                )));
            }
            values.column_mut(j).assign(&Array1::from(column));
            products.push(name.to_string());
        }
        Self::new(days, products, values)
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn products(&self) -> &[String] {
        &self.products
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty() || self.products.is_empty()
    }

    pub fn value(&self, day: usize, product: usize) -> f64 {
        self.values[[day, product]]
    }

    /// Copy with a zero row for every calendar day between the first and last day
    pub fn with_calendar_days(&self) -> Self {
        let (Some(&first), Some(&last)) = (self.days.first(), self.days.last()) else {
            return self.clone();
        };
        let days: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();
        let mut values = Array2::zeros((days.len(), self.products.len()));
        for (row, day) in self.days.iter().enumerate() {
            let idx = (*day - first).num_days() as usize;
            values.row_mut(idx).assign(&self.values.row(row));
        }
        Self {
            days,
            products: self.products.clone(),
            values,
        }
    }

    /// Trailing mean over at most `window` rows ending at `day`
    pub fn rolling_mean(&self, window: usize) -> Array2<f64> {
        self.rolling(window, |rows| rows.mean_axis(Axis(0)))
    }

    /// Trailing sum over at most `window` rows ending at `day`
    pub fn rolling_sum(&self, window: usize) -> Array2<f64> {
        self.rolling(window, |rows| Some(rows.sum_axis(Axis(0))))
    }

    fn rolling<F>(&self, window: usize, reduce: F) -> Array2<f64>
    where
        F: Fn(ndarray::ArrayView2<f64>) -> Option<Array1<f64>>,
    {
        let window = window.max(1);
        let mut out = Array2::zeros(self.values.dim());
        for day in 0..self.days.len() {
            let start = (day + 1).saturating_sub(window);
            if let Some(row) = reduce(self.values.slice(s![start..=day, ..])) {
                out.row_mut(day).assign(&row);
            }
        }
        out
    }
}

/// Sum `value` per (day, product) into a zero-filled matrix
///
/// Products are ordered by name and days chronologically; only days with at
/// least one transaction appear.
pub fn daily_product_matrix<F>(transactions: &[Transaction], value: F) -> AnalysisResult<SalesMatrix>
where
    F: Fn(&Transaction) -> f64,
{
    if transactions.is_empty() {
        return SalesMatrix::new(Vec::new(), Vec::new(), Array2::zeros((0, 0)));
    }

    let frame = df!(
        "day" => transactions.iter().map(|t| t.date.num_days_from_ce()).collect::<Vec<_>>(),
        "product" => transactions.iter().map(|t| t.product.as_str()).collect::<Vec<_>>(),
        "value" => transactions.iter().map(&value).collect::<Vec<_>>()
    )?;
    let grouped = frame
        .lazy()
        .group_by([col("day"), col("product")])
        .agg([col("value").sum()])
        .collect()?;

    let day_col = grouped.column("day")?.i32()?.clone();
    let product_col = grouped.column("product")?.str()?.clone();
    let value_col = grouped.column("value")?.f64()?.clone();

    let mut day_ordinals: Vec<i32> = day_col.into_no_null_iter().collect();
    day_ordinals.sort_unstable();
    day_ordinals.dedup();
    let mut products: Vec<String> = product_col
        .into_no_null_iter()
        .map(str::to_string)
        .collect();
    products.sort();
    products.dedup();

    let mut values = Array2::zeros((day_ordinals.len(), products.len()));
    for idx in 0..grouped.height() {
        let (Some(day), Some(product)) = (day_col.get(idx), product_col.get(idx)) else {
            continue;
        };
        let (Ok(i), Ok(j)) = (
            day_ordinals.binary_search(&day),
            products.binary_search_by(|p| p.as_str().cmp(product)),
        ) else {
            continue;
        };
        values[[i, j]] = value_col.get(idx).unwrap_or_default();
    }

    let days = day_ordinals
        .into_iter()
        .map(|d| {
            NaiveDate::from_num_days_from_ce_opt(d)
                .ok_or_else(|| AnalysisError::DataFormat(format!("invalid day ordinal {d}")))
        })
        .collect::<AnalysisResult<Vec<_>>>()?;
    SalesMatrix::new(days, products, values)
}

/// [`daily_product_matrix`] over every calendar day from the first to the last date
///
/// Days without transactions are zero rows, so a rolling window of N rows
/// spans N calendar days.
pub fn calendar_product_matrix<F>(transactions: &[Transaction], value: F) -> AnalysisResult<SalesMatrix>
where
    F: Fn(&Transaction) -> f64,
{
    Ok(daily_product_matrix(transactions, value)?.with_calendar_days())
}

/// Units sold per day per product, on trading days only
pub fn daily_unit_matrix(transactions: &[Transaction]) -> AnalysisResult<SalesMatrix> {
    daily_product_matrix(transactions, |_| 1.0)
}

/// Total revenue per calendar day, chronologically, with zero for days without sales
pub fn daily_sales(transactions: &[Transaction]) -> Vec<(NaiveDate, f64)> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for t in transactions {
        *totals.entry(t.date).or_default() += t.amount;
    }
    let (Some(&first), Some(&last)) = (totals.keys().next(), totals.keys().next_back()) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|d| (d, totals.get(&d).copied().unwrap_or(0.0)))
        .collect()
}

/// Trailing mean with at least one observation per point
pub fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..series.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &series[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;

    fn txn(stamp: &str, amount: f64, product: &str) -> Transaction {
        Transaction::new(parse_timestamp(stamp).unwrap(), amount, product)
    }

    fn sample_transactions() -> Vec<Transaction> {
        vec![
            txn("2024-03-01 08:10:00", 38.7, "Latte"),
            txn("2024-03-01 09:45:00", 35.3, "Latte"),
            txn("2024-03-01 10:00:00", 28.9, "Americano"),
            txn("2024-03-02 15:30:00", 38.7, "Latte"),
            txn("2024-03-03 20:00:00", 28.9, "Americano"),
        ]
    }

    #[test]
    fn test_aggregate_daily() {
        let rows = aggregate_daily(&sample_transactions(), |p| if p == "Latte" { 20.0 } else { 10.0 }).unwrap();
        assert_eq!(rows.len(), 4);

        let first_latte = rows.iter().find(|r| r.product == "Latte").unwrap();
        assert_eq!(first_latte.units_sold, 2);
        assert!((first_latte.avg_price - 37.0).abs() < 1e-9);
        assert!((first_latte.avg_milk_ratio - 0.7).abs() < 1e-9);
        assert_eq!(first_latte.unit_cost, 20.0);
        assert_eq!(first_latte.weekday, "Fri");
        assert_eq!(first_latte.month, "Mar");
        assert_eq!(first_latte.time_of_day, TimeOfDay::Morning);

        assert_eq!(products(&rows), vec!["Americano".to_string(), "Latte".to_string()]);

        let cortado = aggregate_daily(&[txn("2024-03-04 08:00:00", 31.0, "Cortado")], |_| 14.0).unwrap();
        assert!((cortado[0].avg_milk_ratio - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty_input() {
        let result = aggregate_daily(&[], |_| 1.0);
        assert!(matches!(result, Err(AnalysisError::EmptyResult(_))));
    }

    #[test]
    fn test_baseline_reproduces_single_day_means() {
        let transactions = vec![
            txn("2024-03-05 08:00:00", 30.0, "Cortado"),
            txn("2024-03-05 09:00:00", 34.0, "Cortado"),
            txn("2024-03-05 10:00:00", 35.0, "Cortado"),
        ];
        let rows = aggregate_daily(&transactions, |_| 14.0).unwrap();
        let baseline = ProductBaseline::from_aggregates("Cortado", &rows).unwrap();
        assert!((baseline.current_price - 33.0).abs() < 1e-9);
        assert!((baseline.unit_cost - 14.0).abs() < 1e-9);

        let missing = ProductBaseline::from_aggregates("Mocha", &rows);
        assert!(matches!(missing, Err(AnalysisError::NotFound(_))));
    }

    #[test]
    fn test_daily_unit_matrix_zero_fills() {
        let matrix = daily_unit_matrix(&sample_transactions()).unwrap();
        assert_eq!(matrix.days().len(), 3);
        assert_eq!(matrix.products(), &["Americano".to_string(), "Latte".to_string()]);
        assert_eq!(matrix.value(0, 0), 1.0);
        assert_eq!(matrix.value(0, 1), 2.0);
        assert_eq!(matrix.value(1, 0), 0.0);
        assert_eq!(matrix.value(2, 1), 0.0);
    }

    #[test]
    fn test_rolling_statistics_use_available_history() {
        let days: Vec<_> = (1..=3)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
            .collect();
        let matrix = SalesMatrix::from_columns(days, vec![("A", vec![10.0, 12.0, 8.0])]).unwrap();

        let means = matrix.rolling_mean(2);
        assert_eq!(means.column(0).to_vec(), vec![10.0, 11.0, 10.0]);
        let sums = matrix.rolling_sum(7);
        assert_eq!(sums.column(0).to_vec(), vec![10.0, 22.0, 30.0]);
    }

    #[test]
    fn test_matrix_rejects_unsorted_days() {
        let days = vec![
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ];
        assert!(SalesMatrix::from_columns(days, vec![("A", vec![1.0, 2.0])]).is_err());
    }

    #[test]
    fn test_calendar_matrix_fills_missing_days() {
        let transactions = vec![
            txn("2024-03-01 08:00:00", 30.0, "Americano"),
            txn("2024-03-04 08:00:00", 35.0, "Latte"),
            txn("2024-03-04 09:00:00", 35.0, "Latte"),
        ];
        let trading = daily_unit_matrix(&transactions).unwrap();
        assert_eq!(trading.days().len(), 2);

        let calendar = calendar_product_matrix(&transactions, |_| 1.0).unwrap();
        assert_eq!(calendar.days().len(), 4);
        assert_eq!(calendar.days()[1], NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(calendar.values().row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(calendar.values().row(3).to_vec(), vec![0.0, 2.0]);
        assert_eq!(calendar.rolling_sum(2).row(3).to_vec(), vec![0.0, 2.0]);

        let empty = daily_product_matrix(&[], |_| 1.0).unwrap().with_calendar_days();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_daily_sales_and_moving_average() {
        let sales = daily_sales(&sample_transactions());
        assert_eq!(sales.len(), 3);
        assert!((sales[0].1 - 102.9).abs() < 1e-9);

        let gapped = daily_sales(&[
            txn("2024-03-01 08:00:00", 30.0, "Latte"),
            txn("2024-03-03 08:00:00", 20.0, "Latte"),
        ]);
        let amounts: Vec<f64> = gapped.iter().map(|(_, amount)| *amount).collect();
        assert_eq!(amounts, vec![30.0, 0.0, 20.0]);
        assert!(daily_sales(&[]).is_empty());

        let smoothed = moving_average(&[1.0, 3.0, 5.0, 7.0], 2);
        assert_eq!(smoothed, vec![1.0, 2.0, 4.0, 6.0]);
    }
}
