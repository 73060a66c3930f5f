//! PNG charts rendered with Plotters
//!
//! Every function takes an explicit [`ChartStyle`]; nothing here feeds back
//! into the analysis.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use plotters::prelude::*;
use tracing::info;

use crate::aggregate::moving_average;
use crate::data::MONTH_LABELS;
use crate::eda::{DayTypeSummary, MILK_RATIO_BUCKETS};
use crate::forecast::{BestSellerForecast, SalesForecast};
use crate::pricing::PriceRecommendation;
use crate::segment::{KMeansModel, RfmData};

/// Size, fonts and colours shared by all charts
#[derive(Debug, Clone, PartialEq)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub font: String,
    pub caption_size: u32,
    pub label_size: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            font: "sans-serif".to_string(),
            caption_size: 28,
            label_size: 15,
            background: WHITE,
            palette: vec![
                RGBColor(31, 119, 180),
                RGBColor(255, 127, 14),
                RGBColor(44, 160, 44),
                RGBColor(214, 39, 40),
                RGBColor(148, 103, 189),
                RGBColor(140, 86, 75),
                RGBColor(227, 119, 194),
                RGBColor(127, 127, 127),
            ],
        }
    }
}

impl ChartStyle {
    /// Palette colour for series `idx`, cycling; black for an empty palette
    pub fn color(&self, idx: usize) -> RGBColor {
        if self.palette.is_empty() {
            BLACK
        } else {
            self.palette[idx % self.palette.len()]
        }
    }
}

/// Min..max of `values` widened by `pad` of the span on each side
///
/// A flat or empty series gets a unit-wide range.
pub fn padded_range<I: IntoIterator<Item = f64>>(values: I, pad: f64) -> Range<f64> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() {
        return 0.0..1.0;
    }
    let span = max - min;
    if span <= 0.0 {
        return (min - 0.5)..(max + 0.5);
    }
    (min - span * pad)..(max + span * pad)
}

/// Profit against candidate price with the best price marked
///
/// # Arguments
/// * `recommendation` - Evaluated price grid for one product
/// * `output_path` - PNG destination
/// * `style` - Chart dimensions and colours
pub fn price_profit_chart(
    recommendation: &PriceRecommendation,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let points: Vec<(f64, f64)> = recommendation
        .candidates
        .iter()
        .map(|c| (c.price, c.predicted_profit))
        .collect();
    let title = format!("{}: Price vs Expected Profit", recommendation.product);
    line_chart(&points, &title, ("Price", "Expected Profit"), Some(recommendation.best.price), output_path, style)
}

/// Predicted units against candidate price
pub fn price_demand_chart(
    recommendation: &PriceRecommendation,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let points: Vec<(f64, f64)> = recommendation
        .candidates
        .iter()
        .map(|c| (c.price, c.predicted_units))
        .collect();
    let title = format!("{}: Price vs Predicted Demand", recommendation.product);
    line_chart(&points, &title, ("Price", "Predicted Units"), None, output_path, style)
}

/// Mean milk ratio per hour of day
pub fn milk_ratio_chart(by_hour: &[(u32, f64)], output_path: &Path, style: &ChartStyle) -> crate::Result<()> {
    let points: Vec<(f64, f64)> = by_hour.iter().map(|&(h, r)| (h as f64, r)).collect();
    line_chart(&points, "Average Milk Ratio by Hour", ("Hour", "Milk Ratio"), None, output_path, style)
}

fn line_chart(
    points: &[(f64, f64)],
    title: &str,
    (x_desc, y_desc): (&str, &str),
    marker_x: Option<f64>,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let x_range = padded_range(points.iter().map(|p| p.0), 0.02);
    let y_range = padded_range(points.iter().map(|p| p.1), 0.1);

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range.clone())?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    let line_color = style.color(0);
    chart.draw_series(LineSeries::new(points.iter().copied(), line_color.stroke_width(2)))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, line_color.filled())))?;

    if let Some(x) = marker_x {
        let marker_color = style.color(3);
        chart
            .draw_series(LineSeries::new(
                vec![(x, y_range.start), (x, y_range.end)],
                marker_color.stroke_width(2),
            ))?
            .label(format!("Best price {x:.2}"))
            .legend(move |(lx, ly)| PathElement::new(vec![(lx, ly), (lx + 15, ly)], marker_color.stroke_width(2)));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// Bar chart of transactions per hour
pub fn hourly_transactions_chart(counts: &[usize; 24], output_path: &Path, style: &ChartStyle) -> crate::Result<()> {
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Transactions by Hour of Day", (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..24f64, 0f64..(max_count * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Hour")
        .y_desc("Transactions")
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    let color = style.color(0);
    chart.draw_series(counts.iter().enumerate().map(|(hour, &count)| {
        Rectangle::new(
            [(hour as f64 + 0.1, 0.0), (hour as f64 + 0.9, count as f64)],
            color.filled(),
        )
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// White-to-`base` shade for a heatmap cell holding `value` out of `max`
pub fn heat_shade(value: f64, max: f64, base: RGBColor) -> RGBColor {
    let t = if max > 0.0 { (value / max).clamp(0.0, 1.0) } else { 0.0 };
    let mix = |c: u8| (255.0 - (255.0 - c as f64) * t).round() as u8;
    RGBColor(mix(base.0), mix(base.1), mix(base.2))
}

/// Transactions per hour and milk-ratio bucket as a shaded grid
pub fn milk_ratio_heatmap_chart(
    grid: &[[usize; 4]; 24],
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let max_count = grid.iter().flatten().copied().max().unwrap_or(0) as f64;

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Milk Ratio by Hour", (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(0f64..24f64, 0f64..MILK_RATIO_BUCKETS.len() as f64)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(MILK_RATIO_BUCKETS.len() * 2)
        .y_label_formatter(&|y| {
            let idx = y.floor();
            if (y - idx - 0.5).abs() < 1e-6 {
                MILK_RATIO_BUCKETS
                    .get(idx as usize)
                    .map(|(low, high)| format!("{low:.2}-{high:.2}"))
                    .unwrap_or_default()
            } else {
                String::new()
            }
        })
        .x_desc("Hour")
        .y_desc("Milk Ratio")
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    let base = style.color(0);
    chart.draw_series(grid.iter().enumerate().flat_map(|(hour, row)| {
        row.iter().enumerate().map(move |(bucket, &count)| {
            Rectangle::new(
                [(hour as f64, bucket as f64), (hour as f64 + 1.0, bucket as f64 + 1.0)],
                heat_shade(count as f64, max_count, base).filled(),
            )
        })
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// Average daily sales and orders side by side for each day type
pub fn day_type_chart(summaries: &[DayTypeSummary], output_path: &Path, style: &ChartStyle) -> crate::Result<()> {
    let labels: Vec<String> = summaries.iter().map(|s| s.day_type.label().to_string()).collect();
    let sales: Vec<f64> = summaries.iter().map(|s| s.avg_daily_sales).collect();
    let orders: Vec<f64> = summaries.iter().map(|s| s.avg_daily_orders).collect();

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;
    let panels = root.split_evenly((1, 2));

    bar_panel(&panels[0], &labels, &sales, "Average Daily Sales", "Sales", style.color(0), style)?;
    bar_panel(&panels[1], &labels, &orders, "Average Daily Orders", "Orders", style.color(1), style)?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// Predicted units per product for the next period
pub fn product_forecast_chart(
    forecast: &BestSellerForecast,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let labels: Vec<String> = forecast.predictions.iter().map(|(product, _)| product.clone()).collect();
    let units: Vec<f64> = forecast.predictions.iter().map(|(_, units)| *units).collect();
    let title = format!("Predicted Sales Next {}", forecast.period.label());

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;
    bar_panel(&root, &labels, &units, &title, "Units", style.color(0), style)?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

fn bar_panel(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    labels: &[String],
    values: &[f64],
    title: &str,
    y_desc: &str,
    color: RGBColor,
    style: &ChartStyle,
) -> crate::Result<()> {
    let max_value = values.iter().copied().fold(1.0, f64::max);

    let mut chart = ChartBuilder::on(area)
        .caption(title, (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(labels.len() as f64 - 0.5).max(0.5), 0f64..(max_value * 1.15))?;

    chart
        .configure_mesh()
        .x_labels(labels.len().max(1))
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 && (idx - x).abs() < 1e-6 {
                labels.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .y_desc(y_desc)
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(idx, &value)| {
        let x = idx as f64;
        Rectangle::new([(x - 0.35, 0.0), (x + 0.35, value)], color.filled())
    }))?;
    Ok(())
}

/// Daily sales history with its moving average and the next-day forecast
pub fn sales_forecast_chart(
    forecast: &SalesForecast,
    smoothing_days: usize,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let amounts: Vec<f64> = forecast.history.iter().map(|(_, amount)| *amount).collect();
    let smoothed = moving_average(&amounts, smoothing_days);
    let forecast_x = amounts.len() as f64;
    let mut dates: Vec<String> = forecast.history.iter().map(|(date, _)| date.format("%Y-%m-%d").to_string()).collect();
    dates.push(forecast.date.format("%Y-%m-%d").to_string());

    let x_range = padded_range((0..=amounts.len()).map(|i| i as f64), 0.02);
    let y_range = padded_range(amounts.iter().copied().chain([forecast.predicted_sales]), 0.1);

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Daily Sales and Next-Day Forecast", (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_labels(6)
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 {
                dates.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .x_desc("Date")
        .y_desc("Sales")
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    let history_color = style.color(0);
    chart
        .draw_series(LineSeries::new(
            amounts.iter().enumerate().map(|(i, &v)| (i as f64, v)),
            history_color.stroke_width(1),
        ))?
        .label("Daily sales")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], history_color.stroke_width(2)));

    let trend_color = style.color(1);
    chart
        .draw_series(LineSeries::new(
            smoothed.iter().enumerate().map(|(i, &v)| (i as f64, v)),
            trend_color.stroke_width(2),
        ))?
        .label(format!("{smoothing_days}-day moving average"))
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], trend_color.stroke_width(2)));

    let forecast_color = style.color(3);
    chart
        .draw_series(std::iter::once(Circle::new(
            (forecast_x, forecast.predicted_sales),
            6,
            forecast_color.filled(),
        )))?
        .label(format!("Forecast {:.2}", forecast.predicted_sales))
        .legend(move |(x, y)| Circle::new((x + 7, y), 4, forecast_color.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// Month labels and one count series per product, months in chronological order
pub fn frequency_series(
    monthly: &BTreeMap<(i32, u32), BTreeMap<String, usize>>,
) -> (Vec<String>, BTreeMap<String, Vec<f64>>) {
    let months: Vec<String> = monthly
        .keys()
        .map(|&(year, month)| {
            let label = MONTH_LABELS
                .get(month.saturating_sub(1) as usize)
                .copied()
                .unwrap_or("?");
            format!("{label} {year}")
        })
        .collect();

    let mut series: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for counts in monthly.values() {
        for product in counts.keys() {
            series.entry(product.clone()).or_insert_with(|| vec![0.0; months.len()]);
        }
    }
    for (idx, counts) in monthly.values().enumerate() {
        for (product, &count) in counts {
            if let Some(values) = series.get_mut(product) {
                values[idx] = count as f64;
            }
        }
    }
    (months, series)
}

/// Recommendation count per month, one line per product
pub fn promotion_frequency_chart(
    monthly: &BTreeMap<(i32, u32), BTreeMap<String, usize>>,
    title: &str,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let (months, series) = frequency_series(monthly);
    let max_count = series
        .values()
        .flat_map(|v| v.iter().copied())
        .fold(1.0, f64::max);

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(months.len() as f64 - 0.5).max(0.5), 0f64..(max_count * 1.15))?;

    chart
        .configure_mesh()
        .x_labels(months.len().max(1))
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 && (idx - x).abs() < 1e-6 {
                months.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .x_desc("Month")
        .y_desc("Days Recommended")
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    for (idx, (product, values)) in series.iter().enumerate() {
        let color = style.color(idx);
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(m, &v)| (m as f64, v)),
                color.stroke_width(2),
            ))?
            .label(product.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}

/// Frequency against monetary value (standardized), coloured by cluster
pub fn cluster_scatter_chart(
    rfm_data: &RfmData,
    model: &KMeansModel,
    output_path: &Path,
    style: &ChartStyle,
) -> crate::Result<()> {
    let frequency: Vec<f64> = rfm_data.features.column(1).to_vec();
    let monetary: Vec<f64> = rfm_data.features.column(2).to_vec();
    let x_range = padded_range(frequency.iter().copied(), 0.1);
    let y_range = padded_range(monetary.iter().copied(), 0.1);

    let root = BitMapBackend::new(output_path, (style.width, style.height)).into_drawing_area();
    root.fill(&style.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer Segments: Frequency vs Monetary", (style.font.as_str(), style.caption_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("Frequency (standardized)")
        .y_desc("Monetary (standardized)")
        .axis_desc_style((style.font.as_str(), style.label_size))
        .draw()?;

    chart.draw_series(
        frequency
            .iter()
            .zip(&monetary)
            .zip(model.labels.iter())
            .map(|((&f, &m), &label)| Circle::new((f, m), 4, style.color(label).filled())),
    )?;

    for (cluster, centroid) in model.centroids.outer_iter().enumerate() {
        let color = style.color(cluster);
        let (f, m) = (centroid[1], centroid[2]);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(f - 0.1, m - 0.1), (f + 0.1, m + 0.1)],
                color.filled(),
            )))?
            .label(format!("Cluster {cluster} centroid"))
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "Chart saved");
    Ok(())
}
