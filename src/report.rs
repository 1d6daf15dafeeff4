//! Shapes transaction data into the report payload consumed by the browser
//! client: a table of raw transactions and a bar-chart descriptor of monthly
//! income and expense totals.

use serde::Serialize;

use crate::models::{Transaction, TransactionType};

/// Month names used as the chart's x-axis labels, in calendar order.
pub const MONTH_LABELS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Fill colors for the chart series. Presentation defaults, not business
/// rules.
const EXPENSES_COLOR: &str = "rgba(255, 99, 132, 0.6)";
const INCOME_COLOR: &str = "rgba(54, 162, 235, 0.6)";

/// Per-month transaction totals for one user, split by type.
///
/// Each array is indexed by month-of-year (0 = January). Totals for the same
/// calendar month in different years share a slot, with the later year's
/// total replacing the earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlySummary {
    pub expenses_by_month: [f64; 12],
    pub income_by_month: [f64; 12],
}

/// One row of the transaction history table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRow {
    pub id: i64,
    pub trans_type: TransactionType,
    pub amount: f64,
    pub date: String,
    pub category: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(transaction: &Transaction) -> Self {
        Self {
            id: transaction.id(),
            trans_type: transaction.trans_type(),
            amount: round_to_cents(transaction.amount()),
            date: transaction.date().format("%Y-%m-%d").to_string(),
            category: transaction.category().to_owned(),
        }
    }
}

fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// One bar series of the monthly chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartDataset {
    pub label: &'static str,
    pub data: Vec<f64>,
    #[serde(rename = "backgroundColor")]
    pub background_color: &'static str,
}

/// The labelled series data of the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<&'static str>,
    pub datasets: Vec<ChartDataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartTitle {
    pub display: bool,
    pub text: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartLegend {
    pub position: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPlugins {
    pub legend: ChartLegend,
    pub title: ChartTitle,
}

/// Display options for the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartOptions {
    pub responsive: bool,
    #[serde(rename = "maintainAspectRatio")]
    pub maintain_aspect_ratio: bool,
    pub plugins: ChartPlugins,
}

/// A chart descriptor in the shape the charting client renders directly:
/// labelled series data plus display options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartConfig {
    pub data: ChartData,
    pub options: ChartOptions,
}

/// The aggregate object returned by the transactions report endpoint.
///
/// `method1` is the transaction history table, `method2` the monthly chart.
/// The field names are part of the wire contract with the browser client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub method1: Vec<TransactionRow>,
    pub method2: ChartConfig,
}

/// Project transactions into table rows, preserving the input order.
pub fn format_table(transactions: &[Transaction]) -> Vec<TransactionRow> {
    transactions.iter().map(TransactionRow::from).collect()
}

/// Build the chart descriptor for the monthly income/expense bar chart.
///
/// The expenses series comes first, then income, both aligned to the twelve
/// month labels.
pub fn format_chart_config(summary: &MonthlySummary) -> ChartConfig {
    ChartConfig {
        data: ChartData {
            labels: MONTH_LABELS.to_vec(),
            datasets: vec![
                ChartDataset {
                    label: "Expenses",
                    data: summary.expenses_by_month.to_vec(),
                    background_color: EXPENSES_COLOR,
                },
                ChartDataset {
                    label: "Income",
                    data: summary.income_by_month.to_vec(),
                    background_color: INCOME_COLOR,
                },
            ],
        },
        options: ChartOptions {
            responsive: true,
            maintain_aspect_ratio: false,
            plugins: ChartPlugins {
                legend: ChartLegend { position: "top" },
                title: ChartTitle {
                    display: true,
                    text: "Monthly Income and Expenses",
                },
            },
        },
    }
}

/// Combine the table and chart views into the single report payload.
pub fn build_report_payload(
    transactions: &[Transaction],
    summary: &MonthlySummary,
) -> ReportPayload {
    ReportPayload {
        method1: format_table(transactions),
        method2: format_chart_config(summary),
    }
}
