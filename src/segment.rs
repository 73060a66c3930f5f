//! Card-customer segmentation with K-Means over RFM features

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::data::Transaction;
use crate::error::{AnalysisError, AnalysisResult};

const KMEANS_SEED: u64 = 42;
const SECONDS_PER_DAY: i64 = 86_400;

/// Recency, frequency and monetary value per card customer
#[derive(Debug)]
pub struct RfmData {
    /// Standardized features (n_customers, 3)
    pub features: Array2<f64>,
    /// Card ids in row order
    pub customer_ids: Vec<String>,
    /// Z-score scaler fitted on `raw_features`
    pub scaler: LinearScaler<f64>,
    /// Recency in days, visit count, total spend
    pub raw_features: Array2<f64>,
}

impl RfmData {
    /// Compute RFM from card transactions
    ///
    /// Recency counts whole days between a customer's last visit and the
    /// latest card transaction in the data.
    ///
    /// # Arguments
    /// * `transactions` - All transactions; cash rows are skipped
    ///
    /// # Returns
    /// * `RfmData` with customers sorted by card id
    pub fn from_transactions(transactions: &[Transaction]) -> AnalysisResult<Self> {
        let card_rows: Vec<(&str, &Transaction)> = transactions
            .iter()
            .filter_map(|t| t.card_customer().map(|card| (card, t)))
            .collect();
        if card_rows.is_empty() {
            return Err(AnalysisError::EmptyResult("no card transactions to segment".into()));
        }

        let frame = df!(
            "card" => card_rows.iter().map(|(card, _)| *card).collect::<Vec<_>>(),
            "seconds" => card_rows.iter().map(|(_, t)| t.timestamp.and_utc().timestamp()).collect::<Vec<_>>(),
            "money" => card_rows.iter().map(|(_, t)| t.amount).collect::<Vec<_>>()
        )?;

        let rfm = frame
            .lazy()
            .group_by([col("card")])
            .agg([
                col("seconds").max().alias("last_visit"),
                col("money").count().alias("frequency"),
                col("money").sum().alias("monetary"),
            ])
            .sort(["card"], SortMultipleOptions::default())
            .collect()?;

        let cards = rfm.column("card")?.str()?.clone();
        let last_visit = rfm.column("last_visit")?.i64()?.clone();
        let frequency = rfm.column("frequency")?.cast(&DataType::Float64)?;
        let frequency = frequency.f64()?;
        let monetary = rfm.column("monetary")?.f64()?.clone();

        let latest = last_visit
            .max()
            .ok_or_else(|| AnalysisError::EmptyResult("no card visits".into()))?;

        let n = rfm.height();
        let mut raw_features = Array2::zeros((n, 3));
        let mut customer_ids = Vec::with_capacity(n);
        for idx in 0..n {
            customer_ids.push(cards.get(idx).unwrap_or_default().to_string());
            let last = last_visit.get(idx).unwrap_or(latest);
            raw_features[[idx, 0]] = ((latest - last) / SECONDS_PER_DAY) as f64;
            raw_features[[idx, 1]] = frequency.get(idx).unwrap_or_default();
            raw_features[[idx, 2]] = monetary.get(idx).unwrap_or_default();
        }

        let dataset = Dataset::new(raw_features.clone(), Array1::<usize>::zeros(n));
        let scaler = LinearScaler::standard()
            .fit(&dataset)
            .map_err(|e| AnalysisError::Model(e.to_string()))?;
        let features = scaler.transform(raw_features.clone());
        debug!(customers = n, "Computed RFM features");

        Ok(Self {
            features,
            customer_ids,
            scaler,
            raw_features,
        })
    }

    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }

    /// Scale new raw RFM values with the fitted scaler
    pub fn scale_new_data(&self, rfm: &[f64; 3]) -> Array1<f64> {
        let row = Array2::from_shape_fn((1, 3), |(_, j)| rfm[j]);
        self.scaler.transform(row).row(0).to_owned()
    }
}

/// K-Means parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    pub n_clusters: usize,
    pub max_iters: u64,
    pub tolerance: f64,
}

impl KMeansParams {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted K-Means model with its training assignments
#[derive(Debug)]
pub struct KMeansModel {
    pub model: KMeans<f64, L2Dist>,
    pub n_clusters: usize,
    pub labels: Array1<usize>,
    /// Centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    /// Nearest centroid of a standardized feature vector
    pub fn predict(&self, features: &Array1<f64>) -> AnalysisResult<usize> {
        if features.len() != self.centroids.ncols() {
            return Err(AnalysisError::Model(format!(
                "expected {} features, got {}",
                self.centroids.ncols(),
                features.len()
            )));
        }

        let mut closest = 0;
        let mut min_distance = f64::INFINITY;
        for (cluster, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = euclidean_distance(&features.view(), &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest = cluster;
            }
        }
        Ok(closest)
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` points
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> AnalysisResult<f64> {
        let n_samples = features.nrows().min(sample_size).min(self.labels.len());
        if n_samples < 2 {
            return Ok(0.0);
        }

        let sample = Dataset::new(
            features.slice(s![..n_samples, ..]).to_owned(),
            self.labels.slice(s![..n_samples]).to_owned(),
        );
        sample
            .silhouette_score()
            .map_err(|e| AnalysisError::Model(e.to_string()))
    }
}

/// Size and mean raw RFM of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub avg_recency: f64,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
}

/// Fit K-Means on standardized RFM data
///
/// # Arguments
/// * `rfm_data` - Customer RFM features
/// * `params` - Cluster count and convergence settings
///
/// # Returns
/// * Fitted `KMeansModel` with assignments and inertia
pub fn fit_kmeans(rfm_data: &RfmData, params: &KMeansParams) -> AnalysisResult<KMeansModel> {
    let n_clusters = params.n_clusters;
    if n_clusters == 0 {
        return Err(AnalysisError::Configuration("number of clusters must be at least 1".into()));
    }
    if rfm_data.features.nrows() < n_clusters {
        return Err(AnalysisError::Configuration(format!(
            "number of customers ({}) must be at least the number of clusters ({n_clusters})",
            rfm_data.features.nrows()
        )));
    }

    let targets: Array1<usize> = Array1::zeros(rfm_data.features.nrows());
    let dataset = Dataset::new(rfm_data.features.clone(), targets);

    let model = KMeans::params_with(n_clusters, StdRng::seed_from_u64(KMEANS_SEED), L2Dist)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| AnalysisError::Model(e.to_string()))?;

    let labels: Array1<usize> = model.predict(&rfm_data.features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&rfm_data.features, &labels, &centroids);
    info!(clusters = n_clusters, inertia, "K-Means fitted");

    Ok(KMeansModel {
        model,
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Per-cluster size and mean raw RFM, in cluster order
pub fn cluster_profiles(model: &KMeansModel, rfm_data: &RfmData) -> Vec<ClusterProfile> {
    (0..model.n_clusters)
        .map(|cluster| {
            let members: Vec<usize> = model
                .labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == cluster)
                .map(|(i, _)| i)
                .collect();
            let means = rfm_data
                .raw_features
                .select(Axis(0), &members)
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(3));
            ClusterProfile {
                cluster,
                size: members.len(),
                avg_recency: means[0],
                avg_frequency: means[1],
                avg_monetary: means[2],
            }
        })
        .collect()
}

/// Inertia for every cluster count from 1 to `max_k`, capped at the customer count
pub fn elbow_curve(rfm_data: &RfmData, max_k: usize) -> AnalysisResult<Vec<(usize, f64)>> {
    (1..=max_k.min(rfm_data.len()))
        .map(|k| fit_kmeans(rfm_data, &KMeansParams::new(k)).map(|model| (k, model.inertia)))
        .collect()
}

/// Predict the cluster of new raw RFM values
///
/// # Arguments
/// * `model` - Fitted K-Means model
/// * `rfm_data` - Training RFM data (for the scaler)
/// * `rfm_values` - Raw [recency, frequency, monetary]
pub fn predict_cluster(model: &KMeansModel, rfm_data: &RfmData, rfm_values: &[f64; 3]) -> AnalysisResult<usize> {
    model.predict(&rfm_data.scale_new_data(rfm_values))
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| euclidean_distance(&features.row(i), &centroids.row(cluster)).powi(2))
        .sum()
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;

    fn card_txn(stamp: &str, amount: f64, card: &str) -> Transaction {
        Transaction::new(parse_timestamp(stamp).unwrap(), amount, "Latte").with_card(card)
    }

    /// Two loyal big spenders and two lapsed occasional visitors
    fn create_test_transactions() -> Vec<Transaction> {
        let mut rows = Vec::new();
        for day in 20..=29 {
            rows.push(card_txn(&format!("2024-03-{day} 09:00:00"), 40.0, "ANON-A"));
            rows.push(card_txn(&format!("2024-03-{day} 10:00:00"), 38.0, "ANON-B"));
        }
        rows.push(card_txn("2024-03-01 12:00:00", 25.0, "ANON-C"));
        rows.push(card_txn("2024-03-02 12:00:00", 24.0, "ANON-D"));
        rows.push(Transaction::new(parse_timestamp("2024-03-30 08:00:00").unwrap(), 30.0, "Latte"));
        rows
    }

    #[test]
    fn test_rfm_from_card_transactions() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        assert_eq!(rfm.customer_ids, vec!["ANON-A", "ANON-B", "ANON-C", "ANON-D"]);

        // Latest card visit is 2024-03-29 10:00
        assert_eq!(rfm.raw_features.row(0).to_vec(), vec![0.0, 10.0, 400.0]);
        assert_eq!(rfm.raw_features.row(1).to_vec(), vec![0.0, 10.0, 380.0]);
        assert_eq!(rfm.raw_features.row(2).to_vec(), vec![27.0, 1.0, 25.0]);
        assert_eq!(rfm.raw_features.row(3).to_vec(), vec![26.0, 1.0, 24.0]);

        let column_means = rfm.features.mean_axis(Axis(0)).unwrap();
        assert!(column_means.iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn test_rfm_requires_card_rows() {
        let cash_only = vec![Transaction::new(parse_timestamp("2024-03-01 08:00:00").unwrap(), 30.0, "Latte")];
        assert!(matches!(
            RfmData::from_transactions(&cash_only),
            Err(AnalysisError::EmptyResult(_))
        ));
    }

    #[test]
    fn test_scaler_centres_features() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        let offsets = rfm.scaler.offsets().to_vec();
        assert!((offsets[1] - 5.5).abs() < 1e-9);
        assert!((offsets[2] - 207.25).abs() < 1e-9);

        // A customer at the column means lands on the origin
        let centre = rfm.scale_new_data(&[offsets[0], offsets[1], offsets[2]]);
        assert!(centre.iter().all(|v| v.abs() < 1e-9));

        // Loyal customers sit above the mean frequency, lapsed ones below
        assert!(rfm.features[[0, 1]] > 0.0);
        assert!(rfm.features[[2, 1]] < 0.0);
    }

    #[test]
    fn test_fit_kmeans_separates_groups() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        let model = fit_kmeans(&rfm, &KMeansParams::new(2)).unwrap();

        assert_eq!(model.labels.len(), 4);
        assert_eq!(model.centroids.shape(), &[2, 3]);
        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[2], model.labels[3]);
        assert_ne!(model.labels[0], model.labels[2]);
        assert_eq!(model.cluster_sizes(), vec![2, 2]);
        assert!(model.compute_silhouette_sample(&rfm.features, 100).unwrap() > 0.5);

        let profiles = cluster_profiles(&model, &rfm);
        let loyal = &profiles[model.labels[0]];
        assert_eq!(loyal.size, 2);
        assert!((loyal.avg_monetary - 390.0).abs() < 1e-9);
    }

    #[test]
    fn test_predict_cluster() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        let model = fit_kmeans(&rfm, &KMeansParams::new(2)).unwrap();

        let cluster = predict_cluster(&model, &rfm, &[1.0, 9.0, 350.0]).unwrap();
        assert_eq!(cluster, model.labels[0]);

        let wrong_width = model.predict(&Array1::from(vec![0.0, 1.0]));
        assert!(matches!(wrong_width, Err(AnalysisError::Model(_))));
    }

    #[test]
    fn test_invalid_cluster_count() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        assert!(fit_kmeans(&rfm, &KMeansParams::new(0)).is_err());
        assert!(fit_kmeans(&rfm, &KMeansParams::new(5)).is_err());
    }

    #[test]
    fn test_elbow_curve_is_capped_and_decreasing() {
        let rfm = RfmData::from_transactions(&create_test_transactions()).unwrap();
        let curve = elbow_curve(&rfm, 10).unwrap();
        assert_eq!(curve.len(), 4);
        assert!(curve[0].1 >= curve[1].1);
        assert!(curve[3].1.abs() < 1e-9);
    }
}
