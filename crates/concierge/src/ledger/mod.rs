//! Usage and cost ledger
//!
//! Append-only log of provider calls. Each record carries its cost,
//! computed once from the rate table as `tokens / 1000 * rate`. Aggregates
//! (per day, per month, trailing window) read a consistent snapshot under
//! the read lock.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::CostConfig;
use crate::monitor::{AlertEvent, AlertLevel};

/// Share of a budget at which a warning is raised
const BUDGET_WARNING_RATIO: f64 = 0.8;

/// Billed provider operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Embedding,
    Generation,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Embedding => "embedding",
            Operation::Generation => "generation",
            Operation::Search => "search",
        }
    }
}

/// One provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub tokens_used: u64,
    pub model: String,
    pub cost_usd: f64,
}

/// USD per 1000 tokens by model
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    rates: HashMap<String, f64>,
    default_rate: f64,
}

impl RateTable {
    pub fn new(rates: HashMap<String, f64>, default_rate: f64) -> Self {
        Self {
            rates,
            default_rate,
        }
    }

    pub fn rate(&self, model: &str) -> f64 {
        self.rates.get(model).copied().unwrap_or(self.default_rate)
    }

    pub fn cost(&self, model: &str, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.rate(model)
    }
}

/// Calls, tokens and cost for one group of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.tokens += record.tokens_used;
        self.cost_usd += record.cost_usd;
    }
}

/// Aggregate over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub window_days: u32,
    pub by_operation: HashMap<Operation, UsageTotals>,
    pub by_model: HashMap<String, UsageTotals>,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub record_count: usize,
}

/// Append-only provider usage log
#[derive(Debug)]
pub struct UsageLedger {
    rates: RateTable,
    max_daily_api_calls: usize,
    max_monthly_tokens: u64,
    records: RwLock<Vec<UsageRecord>>,
}

impl UsageLedger {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            rates: RateTable::new(config.rates.clone(), config.default_rate),
            max_daily_api_calls: config.max_daily_api_calls,
            max_monthly_tokens: config.max_monthly_tokens,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Append a record stamped now
    pub fn record(&self, operation: Operation, tokens_used: u64, model: &str) -> UsageRecord {
        self.record_at(Utc::now(), operation, tokens_used, model)
    }

    /// Append a record with an explicit timestamp
    pub fn record_at(
        &self,
        timestamp: DateTime<Utc>,
        operation: Operation,
        tokens_used: u64,
        model: &str,
    ) -> UsageRecord {
        let record = UsageRecord {
            timestamp,
            operation,
            tokens_used,
            model: model.to_string(),
            cost_usd: self.rates.cost(model, tokens_used),
        };
        self.records.write().push(record.clone());
        record
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.read().clone()
    }

    /// Total cost of records stamped on `date` (UTC)
    pub fn daily_cost(&self, date: NaiveDate) -> f64 {
        self.totals_where(|r| r.timestamp.date_naive() == date).cost_usd
    }

    /// Calls recorded on `date` (UTC)
    pub fn daily_calls(&self, date: NaiveDate) -> u64 {
        self.totals_where(|r| r.timestamp.date_naive() == date).calls
    }

    /// Total cost of records in the given calendar month (UTC)
    pub fn monthly_cost(&self, year: i32, month: u32) -> f64 {
        self.totals_where(|r| r.timestamp.year() == year && r.timestamp.month() == month)
            .cost_usd
    }

    /// Tokens recorded in the given calendar month (UTC)
    pub fn monthly_tokens(&self, year: i32, month: u32) -> u64 {
        self.totals_where(|r| r.timestamp.year() == year && r.timestamp.month() == month)
            .tokens
    }

    /// Breakdown of the last `window_days` days
    pub fn breakdown(&self, window_days: u32) -> CostBreakdown {
        self.breakdown_at(Utc::now(), window_days)
    }

    /// Breakdown of records in `(now - window_days, now]`
    pub fn breakdown_at(&self, now: DateTime<Utc>, window_days: u32) -> CostBreakdown {
        let since = now - ChronoDuration::days(i64::from(window_days));
        let records = self.records.read();

        let mut breakdown = CostBreakdown {
            window_days,
            ..Default::default()
        };
        for record in records
            .iter()
            .filter(|r| r.timestamp > since && r.timestamp <= now)
        {
            breakdown
                .by_operation
                .entry(record.operation)
                .or_default()
                .add(record);
            breakdown
                .by_model
                .entry(record.model.clone())
                .or_default()
                .add(record);
            breakdown.total_cost += record.cost_usd;
            breakdown.total_tokens += record.tokens_used;
            breakdown.record_count += 1;
        }
        breakdown
    }

    /// Warnings for daily call and monthly token budgets
    pub fn budget_alerts(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut alerts = Vec::new();

        let calls = self.daily_calls(now.date_naive());
        if let Some(level) = budget_level(calls as f64, self.max_daily_api_calls as f64) {
            alerts.push(
                AlertEvent::new(
                    level,
                    format!(
                        "Daily API calls at {calls} of {} allowed",
                        self.max_daily_api_calls
                    ),
                )
                .with("calls", calls)
                .with("limit", self.max_daily_api_calls as u64),
            );
        }

        let tokens = self.monthly_tokens(now.year(), now.month());
        if let Some(level) = budget_level(tokens as f64, self.max_monthly_tokens as f64) {
            alerts.push(
                AlertEvent::new(
                    level,
                    format!(
                        "Monthly tokens at {tokens} of {} allowed",
                        self.max_monthly_tokens
                    ),
                )
                .with("tokens", tokens)
                .with("limit", self.max_monthly_tokens),
            );
        }

        alerts
    }

    fn totals_where(&self, predicate: impl Fn(&UsageRecord) -> bool) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for record in self.records.read().iter().filter(|r| predicate(r)) {
            totals.add(record);
        }
        totals
    }
}

fn budget_level(used: f64, limit: f64) -> Option<AlertLevel> {
    if limit <= 0.0 {
        return None;
    }
    if used > limit {
        Some(AlertLevel::Critical)
    } else if used >= limit * BUDGET_WARNING_RATIO {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger() -> UsageLedger {
        let config = CostConfig {
            rates: HashMap::from([
                ("model-E".to_string(), 0.0001),
                ("model-G".to_string(), 0.002),
            ]),
            default_rate: 0.01,
            max_daily_api_calls: 10,
            max_monthly_tokens: 10_000,
        };
        UsageLedger::new(&config)
    }

    #[test]
    fn test_cost_uses_rate_table() {
        let ledger = ledger();
        let record = ledger.record(Operation::Generation, 2000, "model-G");
        assert!((record.cost_usd - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_default_rate() {
        let ledger = ledger();
        let record = ledger.record(Operation::Search, 500, "mystery");
        assert!((record.cost_usd - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_daily_cost_filters_by_day() {
        let ledger = ledger();
        let day = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 1).unwrap();

        ledger.record_at(day, Operation::Embedding, 1000, "model-E");
        ledger.record_at(day, Operation::Generation, 1000, "model-G");
        ledger.record_at(next, Operation::Generation, 1000, "model-G");

        let cost = ledger.daily_cost(day.date_naive());
        assert!((cost - 0.0021).abs() < 1e-12);
        assert_eq!(ledger.daily_calls(next.date_naive()), 1);
    }

    #[test]
    fn test_monthly_cost_and_tokens() {
        let ledger = ledger();
        let march = Utc.with_ymd_and_hms(2024, 3, 31, 23, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2024, 4, 1, 1, 0, 0).unwrap();
        ledger.record_at(march, Operation::Generation, 3000, "model-G");
        ledger.record_at(april, Operation::Generation, 1000, "model-G");

        assert!((ledger.monthly_cost(2024, 3) - 0.006).abs() < 1e-12);
        assert_eq!(ledger.monthly_tokens(2024, 4), 1000);
    }

    #[test]
    fn test_breakdown_window_excludes_old_records() {
        let ledger = ledger();
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        ledger.record_at(now - ChronoDuration::days(10), Operation::Embedding, 1000, "model-E");
        ledger.record_at(now - ChronoDuration::hours(1), Operation::Embedding, 1000, "model-E");

        let breakdown = ledger.breakdown_at(now, 7);
        assert_eq!(breakdown.record_count, 1);
        assert_eq!(breakdown.total_tokens, 1000);
        assert_eq!(breakdown.by_operation[&Operation::Embedding].calls, 1);
    }

    #[test]
    fn test_budget_alerts() {
        let ledger = ledger();
        let now = Utc::now();
        assert!(ledger.budget_alerts(now).is_empty());

        for _ in 0..8 {
            ledger.record_at(now, Operation::Embedding, 10, "model-E");
        }
        let alerts = ledger.budget_alerts(now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);

        ledger.record_at(now, Operation::Generation, 20_000, "model-G");
        ledger.record_at(now, Operation::Generation, 10, "model-G");
        ledger.record_at(now, Operation::Generation, 10, "model-G");
        let alerts = ledger.budget_alerts(now);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.level == AlertLevel::Critical));
    }
}
