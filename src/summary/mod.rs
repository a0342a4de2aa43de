//! Financial summaries served through the cache.
//!
//! Computing a summary is the expensive, external part of a request; it sits
//! behind the [`SummarySource`] trait so the HTTP layer only deals with
//! caching it.

use crate::error::{ApiError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Totals for a user's transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_income: f64,
    pub total_expenses: f64,
    pub balance: f64,
}

/// Optional filters narrowing which transactions are summarized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFilters {
    pub category: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SummaryFilters {
    fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(category) = &self.category {
            let wanted = category.to_lowercase();
            if !transaction.category.to_lowercase().contains(&wanted) {
                return false;
            }
        }
        if self.start_date.is_some_and(|start| transaction.date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| transaction.date > end) {
            return false;
        }
        true
    }
}

/// Cache key for a user's summary under a set of filters
pub fn summary_cache_key(user_id: &str, filters: &SummaryFilters) -> Result<String> {
    let filters = serde_json::to_string(filters)
        .map_err(|e| ApiError::Internal(format!("Failed to encode summary filters: {}", e)))?;
    Ok(format!("summary:{}:{}", user_id, filters))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// A single ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
    pub amount: f64,
    pub date: NaiveDate,
}

/// Source of summary computations (typically a database aggregation)
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn calculate_summary(&self, user_id: &str, filters: &SummaryFilters) -> Result<Summary>;
}

/// In-memory transaction ledger
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    transactions: RwLock<Vec<Transaction>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-populated with transactions
    pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions: RwLock::new(transactions),
        }
    }

    /// Append a transaction
    pub async fn record(&self, transaction: Transaction) {
        self.transactions.write().await.push(transaction);
    }
}

#[async_trait]
impl SummarySource for InMemoryLedger {
    async fn calculate_summary(&self, user_id: &str, filters: &SummaryFilters) -> Result<Summary> {
        let transactions = self.transactions.read().await;

        let mut summary = Summary::default();
        for transaction in transactions
            .iter()
            .filter(|t| t.user_id == user_id && filters.matches(t))
        {
            match transaction.kind {
                TransactionKind::Income => summary.total_income += transaction.amount,
                TransactionKind::Expense => summary.total_expenses += transaction.amount,
            }
        }
        summary.balance = summary.total_income - summary.total_expenses;

        debug!(user = %user_id, ?filters, "Calculated summary");
        Ok(summary)
    }
}
