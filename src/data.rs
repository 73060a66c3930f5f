//! Transaction loading and per-row calendar features using Polars

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{AnalysisError, AnalysisResult};

/// Weekday labels in model-encoding order (Mon = 0)
pub const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Month labels in model-encoding order (Jan = 0)
pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const REQUIRED_COLUMNS: [&str; 3] = ["datetime", "money", "coffee_name"];

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Milk and coffee parts per drink; anything unlisted is pure coffee
const MILK_PARTS: [(&str, f64, f64); 8] = [
    ("Latte", 0.7, 0.3),
    ("Cappuccino", 0.67, 0.33),
    ("Flat White", 0.75, 0.25),
    ("Hot Chocolate", 1.0, 0.0),
    ("Cocoa", 1.0, 0.0),
    ("Americano", 0.0, 1.0),
    ("Americano with Milk", 0.2, 0.8),
    ("Cortado", 0.5, 0.5),
];

/// Coarser recipes the demand model's milk feature is built from
const PRICING_MILK_PARTS: [(&str, f64, f64); 8] = [
    ("Latte", 0.7, 0.3),
    ("Cappuccino", 0.5, 0.5),
    ("Flat White", 0.6, 0.4),
    ("Hot Chocolate", 1.0, 0.0),
    ("Cocoa", 1.0, 0.0),
    ("Americano", 0.0, 1.0),
    ("Americano with Milk", 0.2, 0.8),
    ("Cortado", 0.4, 0.6),
];

/// Coarse part of the day a sale happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 3] = [TimeOfDay::Morning, TimeOfDay::Afternoon, TimeOfDay::Night];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            _ => TimeOfDay::Night,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "Morning",
            TimeOfDay::Afternoon => "Afternoon",
            TimeOfDay::Night => "Night",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeOfDay {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeOfDay::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| AnalysisError::Configuration(format!("unknown time of day '{s}'")))
    }
}

/// Calendar classification used by the weekday/weekend comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
}

impl DayType {
    pub const ALL: [DayType; 3] = [DayType::Weekday, DayType::Weekend, DayType::Holiday];

    /// Holidays take precedence over weekends
    pub fn classify(date: NaiveDate, holidays: &BTreeSet<NaiveDate>) -> Self {
        if holidays.contains(&date) {
            DayType::Holiday
        } else if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            DayType::Weekend
        } else {
            DayType::Weekday
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DayType::Weekday => "Weekday",
            DayType::Weekend => "Weekend",
            DayType::Holiday => "Holiday",
        }
    }
}

/// One point-of-sale row
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    /// Amount paid, which is also the unit price (one drink per row)
    pub amount: f64,
    pub product: String,
    pub cash_type: String,
    pub card: Option<String>,
}

impl Transaction {
    pub fn new(timestamp: NaiveDateTime, amount: f64, product: impl Into<String>) -> Self {
        Self {
            timestamp,
            date: timestamp.date(),
            amount,
            product: product.into(),
            cash_type: "cash".to_string(),
            card: None,
        }
    }

    /// Mark the transaction as a card payment by `card`
    pub fn with_card(mut self, card: impl Into<String>) -> Self {
        self.cash_type = "card".to_string();
        self.card = Some(card.into());
        self
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Monday = 0
    pub fn weekday_index(&self) -> usize {
        self.date.weekday().num_days_from_monday() as usize
    }

    pub fn weekday_label(&self) -> &'static str {
        weekday_label(self.date)
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn month_label(&self) -> &'static str {
        month_label(self.date)
    }

    pub fn time_of_day(&self) -> TimeOfDay {
        TimeOfDay::from_hour(self.hour())
    }

    pub fn is_weekend(&self) -> bool {
        self.weekday_index() >= 5
    }

    pub fn milk_ratio(&self) -> f64 {
        milk_ratio_for(&self.product)
    }

    /// Milk ratio as the price optimizer's demand features see it
    pub fn pricing_milk_ratio(&self) -> f64 {
        pricing_milk_ratio_for(&self.product)
    }

    /// Identified card customer, if any
    pub fn card_customer(&self) -> Option<&str> {
        if self.cash_type == "card" {
            self.card.as_deref()
        } else {
            None
        }
    }
}

/// Share of milk in a drink, `milk / (milk + coffee)`
pub fn milk_ratio_for(product: &str) -> f64 {
    ratio_from(&MILK_PARTS, product)
}

/// [`milk_ratio_for`] over the demand model's recipe table
pub fn pricing_milk_ratio_for(product: &str) -> f64 {
    ratio_from(&PRICING_MILK_PARTS, product)
}

fn ratio_from(table: &[(&str, f64, f64)], product: &str) -> f64 {
    let (milk, coffee) = table
        .iter()
        .find(|(name, _, _)| *name == product)
        .map(|(_, milk, coffee)| (*milk, *coffee))
        .unwrap_or((0.0, 1.0));
    let total = milk + coffee;
    if total > 0.0 {
        milk / total
    } else {
        0.0
    }
}

/// Merge drink variants that are promoted as one product
pub fn normalize_product_name(product: &str) -> String {
    product
        .replace("Americano with Milk", "Americano")
        .replace("Cocoa", "Hot Chocolate")
}

/// Apply [`normalize_product_name`] to every transaction
pub fn normalize_products(transactions: &[Transaction]) -> Vec<Transaction> {
    transactions
        .iter()
        .map(|t| Transaction {
            product: normalize_product_name(&t.product),
            ..t.clone()
        })
        .collect()
}

pub fn weekday_label(date: NaiveDate) -> &'static str {
    WEEKDAY_LABELS[date.weekday().num_days_from_monday() as usize]
}

pub fn month_label(date: NaiveDate) -> &'static str {
    MONTH_LABELS[date.month0() as usize]
}

/// Index of a weekday label in [`WEEKDAY_LABELS`]
pub fn weekday_index(label: &str) -> Option<usize> {
    WEEKDAY_LABELS.iter().position(|l| *l == label)
}

/// Index of a month label in [`MONTH_LABELS`]
pub fn month_index(label: &str) -> Option<usize> {
    MONTH_LABELS.iter().position(|l| *l == label)
}

/// Parse a point-of-sale timestamp
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]`, the same with a `T` separator,
/// RFC 3339 and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> AnalysisResult<NaiveDateTime> {
    let raw = raw.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AnalysisError::DataFormat(format!("unparseable timestamp '{raw}'")))
}

/// Load the transaction log from a CSV file
///
/// # Arguments
/// * `file_path` - CSV with at least `datetime`, `money` and `coffee_name`
///
/// # Returns
/// * Transactions in file order
pub fn load_transactions(file_path: &Path) -> AnalysisResult<Vec<Transaction>> {
    if !file_path.exists() {
        return Err(AnalysisError::MissingInput(file_path.to_path_buf()));
    }

    let df = LazyCsvReader::new(file_path)
        .with_has_header(true)
        .finish()?
        .collect()?;

    let transactions = transactions_from_frame(&df)?;
    info!(
        rows = transactions.len(),
        path = %file_path.display(),
        "Loaded transactions"
    );
    Ok(transactions)
}

/// Convert a loaded frame into typed transactions
pub fn transactions_from_frame(df: &DataFrame) -> AnalysisResult<Vec<Transaction>> {
    let columns = df.get_column_names();
    for required in REQUIRED_COLUMNS {
        if !columns.contains(&required) {
            return Err(AnalysisError::DataFormat(format!(
                "required column '{required}' is missing"
            )));
        }
    }
    let has_date = columns.contains(&"date");
    let has_cash_type = columns.contains(&"cash_type");
    let has_card = columns.contains(&"card");

    let money = df
        .column("money")?
        .cast(&DataType::Float64)
        .map_err(|_| AnalysisError::DataFormat("column 'money' is not numeric".into()))?;
    let money = money.f64()?;
    let stamps = string_column(df, "datetime")?;
    let stamps = stamps.str()?;
    let names = string_column(df, "coffee_name")?;
    let names = names.str()?;

    let dates = optional_string_column(df, "date", has_date)?;
    let dates = dates.as_ref().map(|s| s.str()).transpose()?;
    let cash_types = optional_string_column(df, "cash_type", has_cash_type)?;
    let cash_types = cash_types.as_ref().map(|s| s.str()).transpose()?;
    let cards = optional_string_column(df, "card", has_card)?;
    let cards = cards.as_ref().map(|s| s.str()).transpose()?;

    let mut transactions = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let amount = money.get(row).ok_or_else(|| missing_value("money", row))?;
        let raw_stamp = stamps
            .get(row)
            .ok_or_else(|| missing_value("datetime", row))?;
        let product = names
            .get(row)
            .ok_or_else(|| missing_value("coffee_name", row))?;

        let timestamp = parse_timestamp(raw_stamp)?;
        let date = match dates.and_then(|d| d.get(row)) {
            Some(raw) => parse_timestamp(raw)?.date(),
            None => timestamp.date(),
        };
        let cash_type = cash_types
            .and_then(|c| c.get(row))
            .unwrap_or("cash")
            .to_string();
        let card = cards
            .and_then(|c| c.get(row))
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        transactions.push(Transaction {
            timestamp,
            date,
            amount,
            product: product.to_string(),
            cash_type,
            card,
        });
    }

    debug!(rows = transactions.len(), "Converted frame rows");
    Ok(transactions)
}

fn string_column(df: &DataFrame, name: &str) -> AnalysisResult<Series> {
    Ok(df.column(name)?.cast(&DataType::String)?)
}

fn optional_string_column(
    df: &DataFrame,
    name: &str,
    present: bool,
) -> AnalysisResult<Option<Series>> {
    if present {
        string_column(df, name).map(Some)
    } else {
        Ok(None)
    }
}

fn missing_value(column: &str, row: usize) -> AnalysisError {
    AnalysisError::DataFormat(format!("missing '{column}' value in row {}", row + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,datetime,cash_type,card,money,coffee_name").unwrap();
        writeln!(file, "2024-03-01,2024-03-01 10:15:50.520,card,ANON-0000-0000-0001,38.7,Latte").unwrap();
        writeln!(file, "2024-03-01,2024-03-01 12:19:22.539,card,ANON-0000-0000-0002,38.7,Hot Chocolate").unwrap();
        writeln!(file, "2024-03-02,2024-03-02 19:22:01.762,cash,,40,Americano with Milk").unwrap();
        file
    }

    #[test]
    fn test_load_transactions() {
        let test_file = create_test_csv();

        let transactions = load_transactions(test_file.path()).unwrap();
        assert_eq!(transactions.len(), 3);

        let first = &transactions[0];
        assert_eq!(first.product, "Latte");
        assert_eq!(first.card_customer(), Some("ANON-0000-0000-0001"));
        assert_eq!(first.hour(), 10);
        assert_eq!(first.weekday_label(), "Fri");
        assert_eq!(first.month_label(), "Mar");
        assert_eq!(first.time_of_day(), TimeOfDay::Morning);

        let cash = &transactions[2];
        assert_eq!(cash.card_customer(), None);
        assert!((cash.amount - 40.0).abs() < 1e-9);
        assert_eq!(cash.time_of_day(), TimeOfDay::Night);
        assert!(cash.is_weekend());
    }

    #[test]
    fn test_missing_file() {
        let result = load_transactions(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(AnalysisError::MissingInput(_))));
    }

    #[test]
    fn test_missing_required_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "datetime,coffee_name").unwrap();
        writeln!(file, "2024-03-01 10:15:50,Latte").unwrap();

        let result = load_transactions(file.path());
        assert!(matches!(result, Err(AnalysisError::DataFormat(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-03-01 10:15:50.520").unwrap().hour(), 10);
        assert_eq!(parse_timestamp("2024-03-01T08:26:00").unwrap().hour(), 8);
        assert_eq!(parse_timestamp("2024-03-01T08:26:00Z").unwrap().minute(), 26);
        assert_eq!(parse_timestamp("2024-03-01").unwrap().hour(), 0);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_milk_ratio() {
        assert!((milk_ratio_for("Latte") - 0.7).abs() < 1e-9);
        assert!((milk_ratio_for("Hot Chocolate") - 1.0).abs() < 1e-9);
        assert_eq!(milk_ratio_for("Espresso"), 0.0);
        assert!((milk_ratio_for("Cortado") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pricing_milk_ratio_uses_its_own_recipes() {
        assert!((pricing_milk_ratio_for("Cappuccino") - 0.5).abs() < 1e-9);
        assert!((pricing_milk_ratio_for("Flat White") - 0.6).abs() < 1e-9);
        assert!((pricing_milk_ratio_for("Cortado") - 0.4).abs() < 1e-9);
        assert!((pricing_milk_ratio_for("Latte") - milk_ratio_for("Latte")).abs() < 1e-9);
        assert_eq!(pricing_milk_ratio_for("Espresso"), 0.0);
    }

    #[test]
    fn test_normalize_product_name() {
        assert_eq!(normalize_product_name("Americano with Milk"), "Americano");
        assert_eq!(normalize_product_name("Cocoa"), "Hot Chocolate");
        assert_eq!(normalize_product_name("Latte"), "Latte");
    }

    #[test]
    fn test_day_type_classification() {
        let holiday = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let holidays: BTreeSet<_> = [holiday].into_iter().collect();

        assert_eq!(DayType::classify(holiday, &holidays), DayType::Holiday);
        let saturday = NaiveDate::from_ymd_opt(2024, 7, 6).unwrap();
        assert_eq!(DayType::classify(saturday, &holidays), DayType::Weekend);
        let monday = NaiveDate::from_ymd_opt(2024, 7, 8).unwrap();
        assert_eq!(DayType::classify(monday, &holidays), DayType::Weekday);
    }

    #[test]
    fn test_time_of_day_round_trip_labels() {
        assert_eq!("Afternoon".parse::<TimeOfDay>().unwrap(), TimeOfDay::Afternoon);
        assert!("Dawn".parse::<TimeOfDay>().is_err());
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(18), TimeOfDay::Night);
    }
}
