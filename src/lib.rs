//! Brewlytics: sales analytics for a coffee shop's point-of-sale history
//!
//! The library turns raw transactions into a profit-maximizing price per
//! product and a daily promotion plan, plus descriptive statistics, customer
//! segments and a coffee-preference classifier.

pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod data;
pub mod demand;
pub mod eda;
pub mod error;
pub mod forecast;
pub mod holidays;
pub mod pricing;
pub mod promotion;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use aggregate::{aggregate_daily, daily_unit_matrix, DailyProductAggregate, SalesMatrix};
pub use cli::{Args, Command};
pub use config::AnalysisConfig;
pub use data::{load_transactions, TimeOfDay, Transaction};
pub use demand::RidgeDemandModel;
pub use error::{AnalysisError, AnalysisResult};
pub use pricing::{recommend_all_prices, recommend_price, DemandModel, PriceGrid, PriceRecommendation, PriceScenario};
pub use promotion::{analyze_scenarios, recommend_promotions, MarginMap, MarginScenario, PromotionRecommendation};
pub use segment::{fit_kmeans, predict_cluster, KMeansModel, RfmData};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
