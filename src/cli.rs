//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::AnalysisConfig;

/// Coffee-shop sales analytics: price optimization, promotion planning and EDA
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file (overrides the config file)
    #[arg(short, long, global = true)]
    pub input: Option<PathBuf>,

    /// Optional JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for generated charts
    #[arg(short, long, global = true, default_value = "output")]
    pub output_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Recommend the profit-maximizing price for one or every product
    Price(PriceArgs),
    /// Plan which product to promote each day
    Promote {
        /// Trailing days in the sales trend
        #[arg(short, long)]
        window: Option<usize>,
    },
    /// Compare daily promotion targets across margin scenarios and windows
    Scenarios,
    /// Segment card customers with K-Means on RFM features
    Segment {
        /// Number of clusters
        #[arg(short = 'k', long)]
        clusters: Option<usize>,

        /// Predict the segment of a customer: "recency,frequency,monetary"
        #[arg(short, long)]
        predict: Option<String>,
    },
    /// Hour-of-day, milk ratio and day-type statistics
    Eda,
    /// Train coffee-preference classifiers
    Classify,
    /// Forecast next-day sales and next month's and week's best seller
    Forecast {
        /// Trailing calendar days the sales forecast trains on
        #[arg(short, long)]
        training_days: Option<usize>,
    },
    /// Run every analysis
    All,
}

#[derive(ClapArgs, Debug, Clone, Default, PartialEq)]
pub struct PriceArgs {
    /// Product to price; every product when omitted
    #[arg(short, long)]
    pub product: Option<String>,

    /// Weekday label of the scenario, e.g. "Fri"
    #[arg(long)]
    pub weekday: Option<String>,

    /// Month label of the scenario, e.g. "Mar"
    #[arg(long)]
    pub month: Option<String>,

    /// Morning, Afternoon or Night
    #[arg(long)]
    pub time_of_day: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut AnalysisConfig) {
        if let Some(input) = &self.input {
            config.data_path = input.clone();
        }
        match &self.command {
            Command::Price(price) => {
                if let Some(weekday) = &price.weekday {
                    config.scenario.weekday = weekday.clone();
                }
                if let Some(month) = &price.month {
                    config.scenario.month = month.clone();
                }
                if let Some(time_of_day) = &price.time_of_day {
                    config.scenario.time_of_day = time_of_day.clone();
                }
            }
            Command::Promote { window: Some(window) } => config.rolling_window = *window,
            Command::Segment {
                clusters: Some(clusters),
                ..
            } => config.clusters = *clusters,
            Command::Forecast {
                training_days: Some(days),
            } => config.forecast.training_days = *days,
            _ => {}
        }
    }
}

/// Parse RFM values from a "recency,frequency,monetary" string
pub fn parse_rfm_values(raw: &str) -> crate::Result<[f64; 3]> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        anyhow::bail!("Predict values must be in format 'recency,frequency,monetary'");
    }

    let mut values = [0.0; 3];
    for ((slot, part), name) in values.iter_mut().zip(&parts).zip(["recency", "frequency", "monetary"]) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid {} value: {}", name, part))?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfm_values() {
        assert_eq!(parse_rfm_values("30,10,500.0").unwrap(), [30.0, 10.0, 500.0]);
        assert_eq!(parse_rfm_values(" 1 , 2 , 3 ").unwrap(), [1.0, 2.0, 3.0]);
        assert!(parse_rfm_values("invalid").is_err());
        assert!(parse_rfm_values("1,two,3").is_err());
    }

    #[test]
    fn test_price_overrides() {
        let args = Args::parse_from([
            "brewlytics",
            "--input",
            "sales.csv",
            "price",
            "--weekday",
            "Mon",
            "--time-of-day",
            "Night",
        ]);
        let mut config = AnalysisConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.data_path, PathBuf::from("sales.csv"));
        assert_eq!(config.scenario.weekday, "Mon");
        assert_eq!(config.scenario.month, "Mar");
        assert_eq!(config.scenario.time_of_day, "Night");
    }

    #[test]
    fn test_subcommand_overrides() {
        let args = Args::parse_from(["brewlytics", "promote", "--window", "14", "--verbose"]);
        assert!(args.verbose);
        let mut config = AnalysisConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.rolling_window, 14);

        let args = Args::parse_from(["brewlytics", "segment", "-k", "5", "--predict", "3,4,120"]);
        args.apply_overrides(&mut config);
        assert_eq!(config.clusters, 5);
        assert_eq!(
            args.command,
            Command::Segment {
                clusters: Some(5),
                predict: Some("3,4,120".to_string())
            }
        );

        let args = Args::parse_from(["brewlytics", "forecast", "--training-days", "90"]);
        args.apply_overrides(&mut config);
        assert_eq!(config.forecast.training_days, 90);
        let args = Args::parse_from(["brewlytics", "forecast"]);
        args.apply_overrides(&mut config);
        assert_eq!(config.forecast.training_days, 90);
    }
}
