//! Coffee-preference classification with decision trees

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::data::Transaction;
use crate::error::{AnalysisError, AnalysisResult};

const SPLIT_SEED: u64 = 42;
const UNKNOWN: &str = "Unknown";

/// Column names of [`PreferenceFeatures::records`]
pub const FEATURE_NAMES: [&str; 18] = [
    "hour",
    "day_of_week_num",
    "month_num",
    "is_weekend",
    "hour_sin",
    "hour_cos",
    "month_sin",
    "month_cos",
    "day_of_week_sin",
    "day_of_week_cos",
    "customer_visit_count",
    "customer_avg_spend",
    "avg_price_by_hour",
    "avg_price_by_month",
    "hour_weekend",
    "month_weekend",
    "customer_favorite_coffee_encoded",
    "last_coffee_encoded",
];

/// Engineered feature matrix with the coffee each row bought
#[derive(Debug, Clone)]
pub struct PreferenceFeatures {
    pub records: Array2<f64>,
    /// Index into `classes`
    pub targets: Array1<usize>,
    /// Sorted coffee names
    pub classes: Vec<String>,
}

/// Build per-transaction features
///
/// Customer history comes from card payments only. Cash rows get zero visits,
/// the global mean spend and "Unknown" for favourite and previous coffee.
pub fn engineer_features(transactions: &[Transaction]) -> AnalysisResult<PreferenceFeatures> {
    if transactions.is_empty() {
        return Err(AnalysisError::EmptyResult("no transactions to classify".into()));
    }

    let global_mean = transactions.iter().map(|t| t.amount).sum::<f64>() / transactions.len() as f64;
    let price_by_hour = group_mean(transactions, |t| t.hour());
    let price_by_month = group_mean(transactions, |t| t.month());

    let mut history: HashMap<&str, Vec<&Transaction>> = HashMap::new();
    for t in transactions {
        if let Some(card) = t.card_customer() {
            history.entry(card).or_default().push(t);
        }
    }
    for visits in history.values_mut() {
        visits.sort_by_key(|t| t.timestamp);
    }
    let favourites: HashMap<&str, String> = history
        .iter()
        .map(|(card, visits)| (*card, first_mode(visits)))
        .collect();

    let favourite_labels: Vec<String> = transactions
        .iter()
        .map(|t| {
            t.card_customer()
                .and_then(|card| favourites.get(card).cloned())
                .unwrap_or_else(|| UNKNOWN.to_string())
        })
        .collect();
    let last_labels: Vec<String> = transactions
        .iter()
        .map(|t| {
            t.card_customer()
                .and_then(|card| history.get(card))
                .and_then(|visits| previous_coffee(visits, t))
                .unwrap_or_else(|| UNKNOWN.to_string())
        })
        .collect();
    let favourite_codes = label_encode(&favourite_labels);
    let last_codes = label_encode(&last_labels);

    let classes = {
        let mut names: Vec<String> = transactions.iter().map(|t| t.product.clone()).collect();
        names.sort();
        names.dedup();
        names
    };

    let mut records = Array2::zeros((transactions.len(), FEATURE_NAMES.len()));
    let mut targets = Array1::zeros(transactions.len());
    for (idx, t) in transactions.iter().enumerate() {
        let hour = t.hour() as f64;
        let weekday = t.weekday_index() as f64;
        let month = t.month() as f64;
        let weekend = if t.is_weekend() { 1.0 } else { 0.0 };
        let (visits, avg_spend) = match t.card_customer().and_then(|card| history.get(card)) {
            Some(v) => (v.len() as f64, v.iter().map(|x| x.amount).sum::<f64>() / v.len() as f64),
            None => (0.0, global_mean),
        };

        let row = [
            hour,
            weekday,
            month,
            weekend,
            (2.0 * PI * hour / 24.0).sin(),
            (2.0 * PI * hour / 24.0).cos(),
            (2.0 * PI * month / 12.0).sin(),
            (2.0 * PI * month / 12.0).cos(),
            (2.0 * PI * weekday / 7.0).sin(),
            (2.0 * PI * weekday / 7.0).cos(),
            visits,
            avg_spend,
            price_by_hour.get(&t.hour()).copied().unwrap_or(global_mean),
            price_by_month.get(&t.month()).copied().unwrap_or(global_mean),
            hour * weekend,
            month * weekend,
            favourite_codes[idx] as f64,
            last_codes[idx] as f64,
        ];
        records.row_mut(idx).assign(&Array1::from(row.to_vec()));
        targets[idx] = classes.binary_search(&t.product).unwrap_or_default();
    }

    debug!(rows = transactions.len(), classes = classes.len(), "Engineered preference features");
    Ok(PreferenceFeatures {
        records,
        targets,
        classes,
    })
}

fn group_mean<K: Ord, F: Fn(&Transaction) -> K>(transactions: &[Transaction], key: F) -> BTreeMap<K, f64> {
    let mut sums: BTreeMap<K, (f64, usize)> = BTreeMap::new();
    for t in transactions {
        let entry = sums.entry(key(t)).or_default();
        entry.0 += t.amount;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

/// Most bought coffee, alphabetically first on ties
fn first_mode(visits: &[&Transaction]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in visits {
        *counts.entry(t.product.as_str()).or_default() += 1;
    }
    let best = counts.values().copied().max().unwrap_or_default();
    counts
        .into_iter()
        .find(|(_, c)| *c == best)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Coffee of the visit just before `current`, in timestamp order
fn previous_coffee(visits: &[&Transaction], current: &Transaction) -> Option<String> {
    let position = visits.iter().position(|v| std::ptr::eq(*v, current))?;
    position
        .checked_sub(1)
        .map(|prev| visits[prev].product.clone())
}

/// Index of each label in the sorted vocabulary
fn label_encode(labels: &[String]) -> Vec<usize> {
    let mut vocab: Vec<&str> = labels.iter().map(String::as_str).collect();
    vocab.sort_unstable();
    vocab.dedup();
    labels
        .iter()
        .map(|l| vocab.binary_search(&l.as_str()).unwrap_or_default())
        .collect()
}

/// Seeded train/test partition of a feature table
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: Dataset<f64, usize, Ix1>,
    pub test: Dataset<f64, usize, Ix1>,
}

/// Shuffle with a fixed seed and hold out `test_ratio` of the rows
pub fn train_test_split(features: &PreferenceFeatures, test_ratio: f64) -> AnalysisResult<TrainTestSplit> {
    let n = features.records.nrows();
    let dataset = Dataset::new(features.records.clone(), features.targets.clone())
        .shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));
    let (train, test) = dataset.split_with_ratio((1.0 - test_ratio) as f32);
    if train.nsamples() == 0 || test.nsamples() == 0 {
        return Err(AnalysisError::Configuration(format!(
            "test ratio {test_ratio} leaves an empty split for {n} rows"
        )));
    }
    Ok(TrainTestSplit { train, test })
}

fn fit_tree<D>(dataset: &DatasetBase<ArrayBase<D, Ix2>, Array1<usize>>, max_depth: usize) -> AnalysisResult<DecisionTree<f64, usize>>
where
    D: Data<Elem = f64>,
{
    DecisionTree::params()
        .max_depth(Some(max_depth))
        .fit(dataset)
        .map_err(|e| AnalysisError::Model(e.to_string()))
}

/// Bootstrap-aggregated decision trees with majority voting
#[derive(Debug)]
pub struct BaggedForest {
    trees: Vec<DecisionTree<f64, usize>>,
    n_classes: usize,
}

impl BaggedForest {
    /// Fit `n_trees` trees, each on a bootstrap sample as large as `train`
    pub fn fit(train: &Dataset<f64, usize, Ix1>, n_classes: usize, n_trees: usize, max_depth: usize) -> AnalysisResult<Self> {
        let n = train.nsamples();
        if n == 0 || n_trees == 0 {
            return Err(AnalysisError::Configuration("forest needs rows and at least one tree".into()));
        }

        let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
        let trees = train
            .bootstrap_samples(n, &mut rng)
            .take(n_trees)
            .map(|sample| fit_tree(&sample, max_depth))
            .collect::<AnalysisResult<Vec<_>>>()?;

        Ok(Self { trees, n_classes })
    }

    pub fn predict(&self, records: &Array2<f64>) -> Array1<usize> {
        let mut votes = Array2::<usize>::zeros((records.nrows(), self.n_classes.max(1)));
        for tree in &self.trees {
            let predicted: Array1<usize> = tree.predict(records);
            for (row, &class) in predicted.iter().enumerate() {
                if class < votes.ncols() {
                    votes[[row, class]] += 1;
                }
            }
        }
        majority_vote(&votes)
    }

    /// Mean impurity-based importance across trees, per feature column
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut total: Vec<f64> = Vec::new();
        for tree in &self.trees {
            let importance: Vec<f64> = tree.feature_importance().iter().copied().collect();
            if total.len() < importance.len() {
                total.resize(importance.len(), 0.0);
            }
            for (sum, value) in total.iter_mut().zip(importance) {
                *sum += value;
            }
        }
        let n = self.trees.len().max(1) as f64;
        total.into_iter().map(|sum| sum / n).collect()
    }
}

/// Most voted class per row; ties go to the lowest class index
fn majority_vote(votes: &Array2<usize>) -> Array1<usize> {
    votes
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, 0), |best, (class, &count)| if count > best.1 { (class, count) } else { best })
                .0
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub model: String,
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
}

impl ClassificationReport {
    /// Score predictions against the truth
    ///
    /// Precision is 0 for classes never predicted, recall is 0 for classes
    /// absent from the truth.
    pub fn evaluate(model: &str, classes: &[String], predicted: &Array1<usize>, actual: &Array1<usize>) -> Self {
        let total = actual.len();
        let correct = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();

        let per_class = classes
            .iter()
            .enumerate()
            .map(|(class, name)| {
                let tp = predicted
                    .iter()
                    .zip(actual)
                    .filter(|(&p, &a)| p == class && a == class)
                    .count();
                let predicted_count = predicted.iter().filter(|&&p| p == class).count();
                let support = actual.iter().filter(|&&a| a == class).count();
                let precision = ratio(tp, predicted_count);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    class: name.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        Self {
            model: model.to_string(),
            accuracy: ratio(correct, total),
            per_class,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Settings for [`train_and_evaluate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierParams {
    pub tree_max_depth: usize,
    pub forest_size: usize,
    pub forest_max_depth: usize,
    pub test_ratio: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            tree_max_depth: 5,
            forest_size: 50,
            forest_max_depth: 15,
            test_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub train_size: usize,
    pub test_size: usize,
    pub decision_tree: ClassificationReport,
    pub random_forest: ClassificationReport,
    /// Forest importance per feature name, most important first
    pub feature_importance: Vec<(String, f64)>,
}

/// Train the decision tree and the bagged forest and score both on a held-out split
pub fn train_and_evaluate(
    features: &PreferenceFeatures,
    params: &ClassifierParams,
) -> AnalysisResult<ClassificationOutcome> {
    let split = train_test_split(features, params.test_ratio)?;
    let n_classes = features.classes.len();
    let test_targets = split.test.targets().clone();

    let tree = fit_tree(&split.train, params.tree_max_depth)?;
    let tree_predictions: Array1<usize> = tree.predict(split.test.records());
    let decision_tree =
        ClassificationReport::evaluate("Decision Tree", &features.classes, &tree_predictions, &test_targets);

    let forest = BaggedForest::fit(&split.train, n_classes, params.forest_size, params.forest_max_depth)?;
    let random_forest = ClassificationReport::evaluate(
        "Random Forest",
        &features.classes,
        &forest.predict(split.test.records()),
        &test_targets,
    );

    let mut feature_importance: Vec<(String, f64)> = FEATURE_NAMES
        .iter()
        .map(|name| name.to_string())
        .zip(forest.feature_importance().into_iter().chain(std::iter::repeat(0.0)))
        .collect();
    feature_importance.sort_by(|a, b| b.1.total_cmp(&a.1));

    info!(
        tree_accuracy = decision_tree.accuracy,
        forest_accuracy = random_forest.accuracy,
        "Preference classifiers evaluated"
    );

    Ok(ClassificationOutcome {
        train_size: split.train.nsamples(),
        test_size: split.test.nsamples(),
        decision_tree,
        random_forest,
        feature_importance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;

    fn txn(stamp: &str, amount: f64, product: &str) -> Transaction {
        Transaction::new(parse_timestamp(stamp).unwrap(), amount, product)
    }

    /// Lattes every morning, Americanos every evening
    fn create_hourly_pattern() -> Vec<Transaction> {
        let mut rows = Vec::new();
        for i in 0..30u32 {
            let day = i % 14 + 1;
            rows.push(txn(&format!("2024-03-{day:02} {:02}:15:00", 7 + i % 4), 38.0, "Latte"));
            rows.push(txn(&format!("2024-03-{day:02} {:02}:45:00", 19 + i % 4), 28.0, "Americano"));
        }
        rows
    }

    #[test]
    fn test_engineer_features_customer_history() {
        let transactions = vec![
            txn("2024-03-02 08:00:00", 30.0, "Latte").with_card("ANON-1"),
            txn("2024-03-02 09:00:00", 40.0, "Cortado").with_card("ANON-1"),
            txn("2024-03-03 10:00:00", 20.0, "Americano"),
        ];
        let features = engineer_features(&transactions).unwrap();
        assert_eq!(features.classes, vec!["Americano", "Cortado", "Latte"]);
        assert_eq!(features.targets.to_vec(), vec![2, 1, 0]);
        assert_eq!(features.records.ncols(), FEATURE_NAMES.len());

        let first = features.records.row(0);
        assert_eq!(first[0], 8.0);
        assert_eq!(first[1], 5.0);
        assert_eq!(first[3], 1.0);
        assert_eq!(first[10], 2.0);
        assert!((first[11] - 35.0).abs() < 1e-9);
        assert_eq!(first[14], 8.0);

        // Cash row: no visits, global mean spend
        let cash = features.records.row(2);
        assert_eq!(cash[10], 0.0);
        assert!((cash[11] - 30.0).abs() < 1e-9);

        // Favourite tie goes to "Cortado"; vocabulary is [Cortado, Unknown]
        assert_eq!(features.records.column(16).to_vec(), vec![0.0, 0.0, 1.0]);
        // Previous coffee: [Unknown, Latte, Unknown] -> vocabulary [Latte, Unknown]
        assert_eq!(features.records.column(17).to_vec(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_split_is_seeded_and_complete() {
        let features = engineer_features(&create_hourly_pattern()).unwrap();
        let first = train_test_split(&features, 0.3).unwrap();
        let second = train_test_split(&features, 0.3).unwrap();
        assert_eq!(first.test.nsamples(), 18);
        assert_eq!(first.train.nsamples(), 42);
        assert_eq!(first.test.targets(), second.test.targets());

        assert!(train_test_split(&features, 0.0001).is_err());
    }

    #[test]
    fn test_classifiers_learn_hourly_preference() {
        let features = engineer_features(&create_hourly_pattern()).unwrap();
        let outcome = train_and_evaluate(&features, &ClassifierParams {
            forest_size: 10,
            ..ClassifierParams::default()
        })
        .unwrap();

        assert_eq!(outcome.train_size + outcome.test_size, 60);
        assert!(outcome.decision_tree.accuracy >= 0.9);
        assert!(outcome.random_forest.accuracy >= 0.9);
        assert_eq!(outcome.decision_tree.per_class.len(), 2);
        let support: usize = outcome.random_forest.per_class.iter().map(|c| c.support).sum();
        assert_eq!(support, outcome.test_size);

        assert_eq!(outcome.feature_importance.len(), FEATURE_NAMES.len());
        assert!(outcome
            .feature_importance
            .windows(2)
            .all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_report_metrics() {
        let classes = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let actual = Array1::from(vec![0, 0, 1, 1]);
        let predicted = Array1::from(vec![0, 1, 1, 1]);
        let report = ClassificationReport::evaluate("test", &classes, &predicted, &actual);

        assert!((report.accuracy - 0.75).abs() < 1e-9);
        assert_eq!(report.per_class[0].precision, 1.0);
        assert_eq!(report.per_class[0].recall, 0.5);
        assert!((report.per_class[1].precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((report.per_class[1].f1 - 0.8).abs() < 1e-9);
        assert_eq!(report.per_class[2].support, 0);
        assert_eq!(report.per_class[2].f1, 0.0);
    }

    #[test]
    fn test_forest_vote_ties_pick_lowest_class() {
        let votes = Array2::from_shape_vec((3, 3), vec![2, 2, 0, 0, 3, 3, 1, 0, 4]).unwrap();
        assert_eq!(majority_vote(&votes).to_vec(), vec![0, 1, 2]);

        let records = Array2::from_shape_vec((4, 1), vec![0.0, 0.0, 1.0, 1.0]).unwrap();
        let train = Dataset::new(records.clone(), Array1::from(vec![1, 0, 1, 0]));
        let forest = BaggedForest::fit(&train, 2, 3, 3).unwrap();
        assert_eq!(forest.predict(&records).len(), 4);
        assert!(BaggedForest::fit(&train, 2, 0, 3).is_err());
    }
}
