//! Ridge-regression demand model over one-hot encoded daily aggregates

use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::aggregate::DailyProductAggregate;
use crate::data::{month_index, weekday_index, TimeOfDay};
use crate::error::{AnalysisError, AnalysisResult};
use crate::pricing::{DemandFeatures, DemandModel};

const SPLIT_SEED: u64 = 42;

/// Categorical vocabularies fitted on the training table
///
/// One-hot blocks follow vocabulary order and unseen labels encode to an
/// all-zero block. Numeric passthrough columns are price, milk ratio and
/// the ordinal weekday and month indices (-1 when unknown).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEncoder {
    products: Vec<String>,
    weekdays: Vec<String>,
    months: Vec<String>,
    times_of_day: Vec<TimeOfDay>,
}

impl FeatureEncoder {
    pub fn fit(rows: &[DemandFeatures]) -> Self {
        Self {
            products: vocabulary(rows.iter().map(|r| r.product.clone())),
            weekdays: vocabulary(rows.iter().map(|r| r.weekday.clone())),
            months: vocabulary(rows.iter().map(|r| r.month.clone())),
            times_of_day: vocabulary(rows.iter().map(|r| r.time_of_day)),
        }
    }

    pub fn n_features(&self) -> usize {
        self.products.len() + self.weekdays.len() + self.months.len() + self.times_of_day.len() + 4
    }

    pub fn encode(&self, rows: &[DemandFeatures]) -> Array2<f64> {
        let mut encoded = Array2::zeros((rows.len(), self.n_features()));
        for (mut out, row) in encoded.axis_iter_mut(Axis(0)).zip(rows) {
            let mut offset = 0;
            let mut one_hot = |position: Option<usize>, width: usize| {
                if let Some(p) = position {
                    out[offset + p] = 1.0;
                }
                offset += width;
            };
            one_hot(self.products.iter().position(|p| *p == row.product), self.products.len());
            one_hot(self.weekdays.iter().position(|w| *w == row.weekday), self.weekdays.len());
            one_hot(self.months.iter().position(|m| *m == row.month), self.months.len());
            one_hot(
                self.times_of_day.iter().position(|t| *t == row.time_of_day),
                self.times_of_day.len(),
            );

            out[offset] = row.price;
            out[offset + 1] = row.milk_ratio;
            out[offset + 2] = ordinal(weekday_index(&row.weekday));
            out[offset + 3] = ordinal(month_index(&row.month));
        }
        encoded
    }
}

fn vocabulary<T: Ord, I: Iterator<Item = T>>(values: I) -> Vec<T> {
    let mut vocab: Vec<T> = values.collect();
    vocab.sort();
    vocab.dedup();
    vocab
}

fn ordinal(index: Option<usize>) -> f64 {
    index.map(|i| i as f64).unwrap_or(-1.0)
}

/// Hold-out metrics of a fitted demand model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionEvaluation {
    pub rmse: f64,
    pub r2: f64,
    pub train_size: usize,
    pub test_size: usize,
}

impl RegressionEvaluation {
    /// RMSE and R² of `predicted` against `actual`; `train_size` is left at 0
    pub fn score(predicted: &Array1<f64>, actual: &Array1<f64>) -> AnalysisResult<Self> {
        let mse = predicted
            .mean_squared_error(actual)
            .map_err(|e| AnalysisError::Model(e.to_string()))?;
        let r2 = predicted
            .r2(actual)
            .map_err(|e| AnalysisError::Model(e.to_string()))?;
        Ok(Self {
            rmse: mse.sqrt(),
            r2,
            train_size: 0,
            test_size: actual.len(),
        })
    }
}

/// Parameters for [`RidgeDemandModel::train`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandTrainingParams {
    pub penalty: f64,
    pub test_ratio: f64,
}

impl Default for DemandTrainingParams {
    fn default() -> Self {
        Self {
            penalty: 0.1,
            test_ratio: 0.2,
        }
    }
}

/// Units-sold regression with L2 regularisation
#[derive(Debug)]
pub struct RidgeDemandModel {
    encoder: FeatureEncoder,
    model: ElasticNet<f64>,
    pub evaluation: RegressionEvaluation,
}

impl RidgeDemandModel {
    /// Fit on daily aggregates, holding out a seeded random share for evaluation
    ///
    /// Tables too small to split are fitted and evaluated on every row.
    pub fn train(aggregates: &[DailyProductAggregate], params: &DemandTrainingParams) -> AnalysisResult<Self> {
        if aggregates.is_empty() {
            return Err(AnalysisError::EmptyResult("no aggregates to train the demand model on".into()));
        }

        let rows: Vec<DemandFeatures> = aggregates.iter().map(DemandFeatures::from).collect();
        let encoder = FeatureEncoder::fit(&rows);
        let records = encoder.encode(&rows);
        let targets: Array1<f64> = aggregates.iter().map(|a| a.units_sold as f64).collect();

        let shuffled = Dataset::new(records, targets).shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));
        let (train, test) = shuffled.clone().split_with_ratio((1.0 - params.test_ratio) as f32);
        let (train, test) = if train.nsamples() == 0 || test.nsamples() == 0 {
            (shuffled.clone(), shuffled)
        } else {
            (train, test)
        };

        let model = ElasticNet::<f64>::params()
            .penalty(params.penalty)
            .l1_ratio(0.0)
            .fit(&train)
            .map_err(|e| AnalysisError::Model(e.to_string()))?;

        let evaluation = RegressionEvaluation::score(&model.predict(test.records()), test.targets())?;
        let evaluation = RegressionEvaluation {
            train_size: train.nsamples(),
            ..evaluation
        };

        info!(
            rmse = evaluation.rmse,
            r2 = evaluation.r2,
            train = evaluation.train_size,
            test = evaluation.test_size,
            "Demand model trained"
        );

        Ok(Self {
            encoder,
            model,
            evaluation,
        })
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }
}

impl DemandModel for RidgeDemandModel {
    fn predict(&self, rows: &[DemandFeatures]) -> AnalysisResult<Vec<f64>> {
        let records = self.encoder.encode(rows);
        Ok(self.model.predict(&records).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn features(product: &str, weekday: &str, price: f64) -> DemandFeatures {
        DemandFeatures {
            product: product.to_string(),
            weekday: weekday.to_string(),
            month: "Mar".to_string(),
            time_of_day: TimeOfDay::Morning,
            price,
            milk_ratio: 0.5,
        }
    }

    #[test]
    fn test_encoder_layout() {
        let rows = vec![features("Latte", "Fri", 35.0), features("Americano", "Mon", 25.0)];
        let encoder = FeatureEncoder::fit(&rows);
        // 2 products + 2 weekdays + 1 month + 1 time of day + 4 numeric
        assert_eq!(encoder.n_features(), 10);

        let encoded = encoder.encode(&rows);
        assert_eq!(encoded.row(0).to_vec(), vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 35.0, 0.5, 4.0, 2.0]);
        assert_eq!(encoded.row(1).to_vec(), vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 25.0, 0.5, 0.0, 2.0]);
    }

    #[test]
    fn test_encoder_ignores_unseen_labels() {
        let encoder = FeatureEncoder::fit(&[features("Latte", "Fri", 35.0)]);
        let encoded = encoder.encode(&[features("Mocha", "Sun", 30.0)]);
        // Unknown product block is zero, weekday "Sun" unseen but still ordinal 6
        assert_eq!(encoded.row(0).to_vec(), vec![0.0, 0.0, 1.0, 1.0, 30.0, 0.5, 6.0, 2.0]);
    }

    #[test]
    fn test_train_learns_downward_price_response() {
        let mut aggregates = Vec::new();
        for day in 1..=28u32 {
            let price = 30.0 + (day % 5) as f64;
            let date = NaiveDate::from_ymd_opt(2024, 2, day).unwrap();
            aggregates.push(DailyProductAggregate {
                product: "Latte".to_string(),
                date,
                weekday: crate::data::weekday_label(date).to_string(),
                month: "Feb".to_string(),
                time_of_day: TimeOfDay::Morning,
                units_sold: (80.0 - 2.0 * price) as u32,
                avg_price: price,
                avg_milk_ratio: 0.7,
                unit_cost: 20.0,
            });
        }

        let model = RidgeDemandModel::train(&aggregates, &DemandTrainingParams::default()).unwrap();
        assert_eq!(model.evaluation.train_size + model.evaluation.test_size, 28);
        assert!(model.evaluation.rmse.is_finite());

        let mut cheap = features("Latte", "Wed", 30.0);
        cheap.month = "Feb".to_string();
        let mut dear = cheap.clone();
        dear.price = 34.0;
        let predicted = DemandModel::predict(&model, &[cheap, dear]).unwrap();
        assert_eq!(predicted.len(), 2);
        assert!(predicted[0] > predicted[1]);
    }

    #[test]
    fn test_train_rejects_empty_table() {
        let result = RidgeDemandModel::train(&[], &DemandTrainingParams::default());
        assert!(matches!(result, Err(AnalysisError::EmptyResult(_))));
    }

    #[test]
    fn test_regression_metrics() {
        let actual = Array1::from(vec![1.0, 2.0, 3.0]);
        let perfect = RegressionEvaluation::score(&actual, &actual).unwrap();
        assert_eq!(perfect.rmse, 0.0);
        assert!((perfect.r2 - 1.0).abs() < 1e-9);
        assert_eq!(perfect.test_size, 3);

        // Predicting the mean explains nothing
        let flat = Array1::from(vec![2.0, 2.0, 2.0]);
        let baseline = RegressionEvaluation::score(&flat, &actual).unwrap();
        assert!((baseline.rmse - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!(baseline.r2.abs() < 1e-9);

        assert!(RegressionEvaluation::score(&Array1::zeros(0), &Array1::zeros(0)).is_err());
    }

    #[test]
    fn test_tiny_tables_are_evaluated_in_sample() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();
        let row = DailyProductAggregate {
            product: "Latte".to_string(),
            date,
            weekday: "Mon".to_string(),
            month: "Feb".to_string(),
            time_of_day: TimeOfDay::Morning,
            units_sold: 4,
            avg_price: 35.0,
            avg_milk_ratio: 0.7,
            unit_cost: 20.0,
        };
        let model = RidgeDemandModel::train(&[row], &DemandTrainingParams::default()).unwrap();
        assert_eq!(model.evaluation.train_size, 1);
        assert_eq!(model.evaluation.test_size, 1);
    }
}
