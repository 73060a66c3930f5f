//! Brewlytics: coffee-shop sales analytics CLI
//!
//! This is the main entrypoint that loads configuration and transactions,
//! runs the requested analyses, prints their reports and renders charts.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use brewlytics::aggregate::{daily_sales, moving_average};
use brewlytics::classify::{engineer_features, train_and_evaluate, ClassificationReport, ClassifierParams};
use brewlytics::data::normalize_products;
use brewlytics::demand::DemandTrainingParams;
use brewlytics::eda::{day_type_summary, hourly_transaction_counts, milk_ratio_by_hour, milk_ratio_heatmap, MILK_RATIO_BUCKETS};
use brewlytics::forecast::{forecast_best_seller, forecast_next_day_sales, BestSellerForecast, ForecastPeriod};
use brewlytics::promotion::{monthly_frequency, top_recommendations};
use brewlytics::segment::{cluster_profiles, elbow_curve, KMeansParams};
use brewlytics::viz::{self, ChartStyle};
use brewlytics::{
    aggregate_daily, analyze_scenarios, cli, daily_unit_matrix, fit_kmeans, load_transactions, predict_cluster,
    recommend_all_prices, recommend_price, recommend_promotions, AnalysisConfig, Args, Command, PriceRecommendation,
    RfmData, RidgeDemandModel, Transaction,
};

const SILHOUETTE_SAMPLE: usize = 100;
const ELBOW_MAX_K: usize = 8;
const SALES_SMOOTHING_DAYS: usize = 7;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = AnalysisConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let start_time = Instant::now();
    let transactions = load_transactions(&config.data_path)
        .with_context(|| format!("loading {}", config.data_path.display()))?;
    println!("✓ Data loaded: {} transactions", transactions.len());

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let ctx = RunContext {
        config: &config,
        transactions: &transactions,
        output_dir: &args.output_dir,
        style: ChartStyle::default(),
    };

    match &args.command {
        Command::Price(price) => run_price(&ctx, price.product.as_deref())?,
        Command::Promote { .. } => run_promote(&ctx)?,
        Command::Scenarios => run_scenarios(&ctx)?,
        Command::Segment { predict, .. } => run_segment(&ctx, predict.as_deref())?,
        Command::Eda => run_eda(&ctx)?,
        Command::Classify => run_classify(&ctx)?,
        Command::Forecast { .. } => run_forecast(&ctx)?,
        Command::All => run_all(&ctx)?,
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Initialise the `tracing` subscriber
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "brewlytics=debug" } else { "brewlytics=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(env_filter).with_target(true).init();
}

struct RunContext<'a> {
    config: &'a AnalysisConfig,
    transactions: &'a [Transaction],
    output_dir: &'a Path,
    style: ChartStyle,
}

/// Run every step, reporting failures without stopping the others
fn run_all(ctx: &RunContext) -> Result<()> {
    let steps: [(&str, fn(&RunContext) -> Result<()>); 7] = [
        ("eda", run_eda),
        ("price", |ctx| run_price(ctx, None)),
        ("promote", run_promote),
        ("scenarios", run_scenarios),
        ("segment", |ctx| run_segment(ctx, None)),
        ("classify", run_classify),
        ("forecast", run_forecast),
    ];

    let mut failed = Vec::new();
    for (name, step) in steps {
        if let Err(e) = step(ctx) {
            error!(step = name, error = %e, "Analysis step failed");
            failed.push(name);
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("failed steps: {}", failed.join(", "));
    }
    Ok(())
}

fn run_price(ctx: &RunContext, product: Option<&str>) -> Result<()> {
    println!("\n=== Price Optimization ===");
    let config = ctx.config;

    let aggregates = aggregate_daily(ctx.transactions, |p| config.unit_cost(p))?;
    let model = RidgeDemandModel::train(&aggregates, &DemandTrainingParams::default())?;
    println!(
        "Demand model: RMSE {:.3}, R² {:.3} ({} train / {} test rows)",
        model.evaluation.rmse, model.evaluation.r2, model.evaluation.train_size, model.evaluation.test_size
    );

    let scenario = config.price_scenario()?;
    let grid = config.price_grid()?;
    println!("Scenario: {}", scenario.describe());

    let recommendations = match product {
        Some(product) => vec![recommend_price(product, &aggregates, &model, &scenario, &grid)
            .with_context(|| format!("pricing '{product}'"))?],
        None => recommend_all_prices(&aggregates, &model, &scenario, &grid)?,
    };

    if product.is_some() {
        for recommendation in &recommendations {
            print_candidates(recommendation);
        }
    }

    println!("\n  {:<20} | {:>8} | {:>8} | {:>10} | {:>10}", "Product", "Current", "Best", "Units", "Profit");
    println!("  {:-<20}-|-{:->8}-|-{:->8}-|-{:->10}-|-{:->10}", "", "", "", "", "");
    for r in &recommendations {
        println!(
            "  {:<20} | {:>8.2} | {:>8.2} | {:>10.2} | {:>10.2}",
            r.product, r.current_price, r.best.price, r.best.predicted_units, r.best.predicted_profit
        );
    }

    for r in &recommendations {
        let slug = slug(&r.product);
        viz::price_profit_chart(r, &ctx.output_dir.join(format!("price_profit_{slug}.png")), &ctx.style)?;
        viz::price_demand_chart(r, &ctx.output_dir.join(format!("price_demand_{slug}.png")), &ctx.style)?;
    }
    info!(products = recommendations.len(), "Price optimization complete");
    Ok(())
}

fn print_candidates(recommendation: &PriceRecommendation) {
    println!(
        "\n{} (current {:.2}, unit cost {:.2})",
        recommendation.product, recommendation.current_price, recommendation.unit_cost
    );
    println!("  {:>8} | {:>10} | {:>10}", "Price", "Units", "Profit");
    for c in &recommendation.candidates {
        let marker = if c.price == recommendation.best.price { " <- best" } else { "" };
        println!(
            "  {:>8.2} | {:>10.2} | {:>10.2}{}",
            c.price, c.predicted_units, c.predicted_profit, marker
        );
    }
}

fn run_promote(ctx: &RunContext) -> Result<()> {
    println!("\n=== Daily Promotion Plan ===");
    let normalized = normalize_products(ctx.transactions);
    let matrix = daily_unit_matrix(&normalized)?;
    let plan = recommend_promotions(&matrix, &ctx.config.margins(), ctx.config.rolling_window)?;

    println!("{} days planned with a {}-day trend", plan.len(), ctx.config.rolling_window);
    for rec in plan.iter().rev().take(7).rev() {
        println!("  {} -> {} (score {:.2})", rec.date, rec.product, rec.score);
    }

    println!("\nMost recommended:");
    for (product, count) in top_recommendations(&plan, 5) {
        println!("  {product}: {count} days");
    }

    viz::promotion_frequency_chart(
        &monthly_frequency(&plan),
        "Promotion Recommendations per Month",
        &ctx.output_dir.join("promotion_frequency.png"),
        &ctx.style,
    )?;
    Ok(())
}

fn run_scenarios(ctx: &RunContext) -> Result<()> {
    println!("\n=== Margin Scenarios ===");
    let normalized = normalize_products(ctx.transactions);
    let outcomes = analyze_scenarios(&normalized, &ctx.config.margin_scenarios(), &ctx.config.rolling_windows)?;

    for outcome in &outcomes {
        let top: Vec<String> = top_recommendations(&outcome.recommendations, 3)
            .into_iter()
            .map(|(product, count)| format!("{product} ({count})"))
            .collect();
        println!("  {:<40} {}", outcome.key, top.join(", "));

        viz::promotion_frequency_chart(
            &monthly_frequency(&outcome.recommendations),
            &outcome.key,
            &ctx.output_dir.join(format!("{}.png", outcome.key)),
            &ctx.style,
        )?;
    }
    info!(scenarios = outcomes.len(), "Scenario analysis complete");
    Ok(())
}

fn run_segment(ctx: &RunContext, predict: Option<&str>) -> Result<()> {
    println!("\n=== Customer Segmentation ===");
    let rfm_data = RfmData::from_transactions(ctx.transactions)?;
    let model = fit_kmeans(&rfm_data, &KMeansParams::new(ctx.config.clusters))?;

    println!("Card customers: {}", rfm_data.len());
    println!("Within-cluster sum of squares: {:.2}", model.inertia);
    println!(
        "Silhouette score (sample): {:.3}",
        model.compute_silhouette_sample(&rfm_data.features, SILHOUETTE_SAMPLE)?
    );

    println!("\n  Cluster | Customers | Recency | Frequency | Monetary");
    println!("  --------|-----------|---------|-----------|----------");
    for p in cluster_profiles(&model, &rfm_data) {
        println!(
            "  {:7} | {:9} | {:7.1} | {:9.1} | {:8.2}",
            p.cluster, p.size, p.avg_recency, p.avg_frequency, p.avg_monetary
        );
    }

    println!("\nElbow curve:");
    for (k, inertia) in elbow_curve(&rfm_data, ELBOW_MAX_K)? {
        println!("  k={k}: {inertia:.2}");
    }

    if let Some(raw) = predict {
        let values = cli::parse_rfm_values(raw)?;
        let cluster = predict_cluster(&model, &rfm_data, &values)?;
        println!("\n✓ Predicted cluster for R={}, F={}, M={}: {cluster}", values[0], values[1], values[2]);
    }

    viz::cluster_scatter_chart(&rfm_data, &model, &ctx.output_dir.join("clusters.png"), &ctx.style)?;
    Ok(())
}

fn run_eda(ctx: &RunContext) -> Result<()> {
    println!("\n=== Exploratory Analysis ===");
    let transactions = ctx.transactions;

    let hourly = hourly_transaction_counts(transactions);
    println!("Transactions by hour:");
    for (hour, count) in hourly.iter().enumerate().filter(|(_, &c)| c > 0) {
        println!("  {hour:02}:00  {count}");
    }

    let milk = milk_ratio_by_hour(transactions)?;
    let heatmap = milk_ratio_heatmap(transactions);
    println!("\nMilk ratio by hour (mean, then counts per bucket {:?}):", MILK_RATIO_BUCKETS);
    for (hour, ratio) in &milk {
        println!("  {hour:02}:00  {ratio:.3}  {:?}", heatmap[*hour as usize]);
    }

    println!("\nDay type comparison:");
    let day_types = day_type_summary(transactions, &ctx.config.holiday_set())?;
    for summary in &day_types {
        let stats = summary.order_values;
        println!(
            "  {:<8} days {:>4} | sales/day {:>9.2} | orders/day {:>6.1} | order mean {:.2} median {:.2} std {:.2} [{:.2}, {:.2}]",
            summary.day_type.label(),
            summary.days,
            summary.avg_daily_sales,
            summary.avg_daily_orders,
            stats.mean,
            stats.median,
            stats.std_dev,
            stats.min,
            stats.max
        );
        for share in &summary.top_products {
            println!("      {:<20} {:>5} ({:.1}%)", share.product, share.count, share.percentage);
        }
    }

    let sales = daily_sales(transactions);
    let amounts: Vec<f64> = sales.iter().map(|(_, total)| *total).collect();
    let smoothed = moving_average(&amounts, SALES_SMOOTHING_DAYS);
    if let (Some((date, total)), Some(trend)) = (sales.last(), smoothed.last()) {
        println!("\nLatest day {date}: sales {total:.2}, {SALES_SMOOTHING_DAYS}-day average {trend:.2}");
    }

    viz::hourly_transactions_chart(&hourly, &ctx.output_dir.join("hourly_transactions.png"), &ctx.style)?;
    viz::milk_ratio_chart(&milk, &ctx.output_dir.join("milk_ratio_by_hour.png"), &ctx.style)?;
    viz::milk_ratio_heatmap_chart(&heatmap, &ctx.output_dir.join("milk_ratio_heatmap.png"), &ctx.style)?;
    viz::day_type_chart(&day_types, &ctx.output_dir.join("day_types.png"), &ctx.style)?;
    Ok(())
}

fn run_classify(ctx: &RunContext) -> Result<()> {
    println!("\n=== Coffee Preference Classification ===");
    let config = ctx.config;
    let features = engineer_features(ctx.transactions)?;
    println!("Classes: {}", features.classes.join(", "));

    let params = ClassifierParams {
        tree_max_depth: config.tree_max_depth,
        forest_size: config.forest_size,
        forest_max_depth: config.forest_max_depth,
        test_ratio: config.test_ratio,
    };
    let outcome = train_and_evaluate(&features, &params)?;
    println!("Training set: {} samples, test set: {} samples", outcome.train_size, outcome.test_size);

    print_report(&outcome.decision_tree);
    print_report(&outcome.random_forest);

    println!("\nFeature importance:");
    for (name, importance) in outcome.feature_importance.iter().take(10) {
        println!("  {name:<34} {importance:.4}");
    }
    Ok(())
}

fn run_forecast(ctx: &RunContext) -> Result<()> {
    println!("\n=== Sales Forecast ===");
    let settings = &ctx.config.forecast;
    let forecaster = settings.forecaster();

    let sales = forecast_next_day_sales(ctx.transactions, &forecaster, settings.training_days)?;
    println!(
        "Predicted sales for {}: {:.2} (trained on {} days)",
        sales.date,
        sales.predicted_sales,
        sales.history.len()
    );
    viz::sales_forecast_chart(
        &sales,
        SALES_SMOOTHING_DAYS,
        &ctx.output_dir.join("sales_forecast.png"),
        &ctx.style,
    )?;

    for (period, periods_back) in [
        (ForecastPeriod::Month, settings.months_back),
        (ForecastPeriod::Week, settings.weeks_back),
    ] {
        let forecast = forecast_best_seller(ctx.transactions, &forecaster, period, periods_back)?;
        print_best_seller(&forecast);
        viz::product_forecast_chart(
            &forecast,
            &ctx.output_dir.join(format!("coffee_forecast_{}.png", period.label())),
            &ctx.style,
        )?;
    }
    Ok(())
}

fn print_best_seller(forecast: &BestSellerForecast) {
    println!(
        "\nMost sold coffee next {}: {} ({:.1} units, from {} {}s)",
        forecast.period.label(),
        forecast.product,
        forecast.predicted_units,
        forecast.periods_used,
        forecast.period.label()
    );
    for (product, units) in &forecast.predictions {
        println!("  {product:<20} {units:>8.1}");
    }
}

fn print_report(report: &ClassificationReport) {
    println!("\n{}", "=".repeat(70));
    println!("Model: {}", report.model);
    println!("Accuracy: {:.2}%", report.accuracy * 100.0);
    println!("  {:<20} {:>9} {:>9} {:>9} {:>9}", "class", "precision", "recall", "f1", "support");
    for c in &report.per_class {
        println!(
            "  {:<20} {:>9.2} {:>9.2} {:>9.2} {:>9}",
            c.class, c.precision, c.recall, c.f1, c.support
        );
    }
}

fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
