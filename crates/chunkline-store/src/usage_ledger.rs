//! Daily token accounting with a rolling 30-day window.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use chunkline_protocol::{JobResult, TokenUsage, UsageSink};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::file_store::storage_error;

pub const HISTORY_DAYS: u64 = 30;
pub const INPUT_USD_PER_MILLION: f64 = 0.5;
pub const OUTPUT_USD_PER_MILLION: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    #[serde(default)]
    pub input: u64,
    /// Candidate plus thinking tokens.
    #[serde(default)]
    pub output: u64,
}

impl DailyUsage {
    pub fn estimated_cost_usd(&self) -> f64 {
        self.input as f64 * INPUT_USD_PER_MILLION / 1_000_000.0
            + self.output as f64 * OUTPUT_USD_PER_MILLION / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageSummary {
    pub today: DailyUsage,
    pub monthly: DailyUsage,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageHistory {
    days: BTreeMap<NaiveDate, DailyUsage>,
}

fn cutoff(today: NaiveDate) -> NaiveDate {
    today.checked_sub_days(Days::new(HISTORY_DAYS)).unwrap_or(NaiveDate::MIN)
}

impl UsageHistory {
    pub fn record(&mut self, today: NaiveDate, usage: TokenUsage) {
        let day = self.days.entry(today).or_default();
        day.input += usage.input_tokens;
        day.output += usage.billed_output();
        self.prune(today);
    }

    /// Drop days older than the 30-day window.
    pub fn prune(&mut self, today: NaiveDate) {
        let oldest = cutoff(today);
        self.days.retain(|date, _| *date >= oldest);
    }

    pub fn summary(&self, today: NaiveDate) -> UsageSummary {
        let oldest = cutoff(today);
        let monthly = self
            .days
            .range(oldest..)
            .fold(DailyUsage::default(), |acc, (_, day)| DailyUsage {
                input: acc.input + day.input,
                output: acc.output + day.output,
            });
        UsageSummary {
            today: self.days.get(&today).copied().unwrap_or_default(),
            monthly,
            estimated_cost_usd: monthly.estimated_cost_usd(),
        }
    }

    pub fn days(&self) -> impl Iterator<Item = (&NaiveDate, &DailyUsage)> {
        self.days.iter()
    }
}

/// [`UsageSink`] backed by `<root>/usage.json`.
#[derive(Debug)]
pub struct FileUsageLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileUsageLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            path: root.join("usage.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<UsageHistory> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(UsageHistory::default());
        }
        let raw = fs::read(&self.path)
            .await
            .with_context(|| format!("failed reading usage ledger {:?}", self.path))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed parsing usage ledger {:?}", self.path))
    }

    async fn write(&self, history: &UsageHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create ledger dir {parent:?}"))?;
        }
        let payload = serde_json::to_vec_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed writing {tmp:?}"))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed replacing usage ledger {:?}", self.path))
    }

    pub async fn record_on(&self, today: NaiveDate, usage: TokenUsage) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.read().await?;
        history.record(today, usage);
        self.write(&history).await?;
        debug!(
            input = usage.input_tokens,
            output = usage.billed_output(),
            "token usage recorded"
        );
        Ok(())
    }

    pub async fn history(&self) -> Result<UsageHistory> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn summary(&self) -> Result<UsageSummary> {
        Ok(self.history().await?.summary(Utc::now().date_naive()))
    }
}

#[async_trait]
impl UsageSink for FileUsageLedger {
    async fn record(&self, usage: TokenUsage) -> JobResult<()> {
        self.record_on(Utc::now().date_naive(), usage)
            .await
            .map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
    }

    #[test]
    fn thinking_tokens_bill_as_output() {
        let mut history = UsageHistory::default();
        let today = date(2026, 3, 10);
        history.record(today, TokenUsage::new(100, 40, 10));
        history.record(today, TokenUsage::new(50, 5, 0));

        let summary = history.summary(today);
        assert_eq!(summary.today, DailyUsage { input: 150, output: 55 });
        assert_eq!(summary.monthly, summary.today);
    }

    #[test]
    fn old_days_are_pruned_and_excluded() {
        let mut history = UsageHistory::default();
        history.record(date(2026, 1, 1), TokenUsage::new(1_000, 0, 0));
        history.record(date(2026, 2, 20), TokenUsage::new(10, 10, 0));
        history.record(date(2026, 3, 10), TokenUsage::new(5, 5, 0));

        assert_eq!(history.days().count(), 2);
        let summary = history.summary(date(2026, 3, 10));
        assert_eq!(summary.monthly, DailyUsage { input: 15, output: 15 });
    }

    #[test]
    fn cost_uses_per_million_prices() {
        let usage = DailyUsage {
            input: 2_000_000,
            output: 1_000_000,
        };
        assert!((usage.estimated_cost_usd() - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ledger_persists_across_instances() -> Result<()> {
        let root = unique_test_root("chunkline-usage");
        let today = date(2026, 5, 1);

        FileUsageLedger::new(&root)
            .record_on(today, TokenUsage::new(10, 3, 2))
            .await?;
        let ledger = FileUsageLedger::new(&root);
        ledger.record_on(today, TokenUsage::new(1, 1, 0)).await?;

        let history = ledger.history().await?;
        assert_eq!(
            history.summary(today).today,
            DailyUsage { input: 11, output: 6 }
        );

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn ledger_is_replaced_through_temp_file() -> Result<()> {
        let root = unique_test_root("chunkline-usage-tmp");
        let today = date(2026, 5, 2);
        let ledger = FileUsageLedger::new(&root);
        let tmp = ledger.path().with_extension("json.tmp");

        // leftover from an interrupted write
        fs::create_dir_all(&root).await?;
        fs::write(&tmp, b"{\"days\":").await?;

        ledger.record_on(today, TokenUsage::new(7, 2, 1)).await?;
        assert!(!fs::try_exists(&tmp).await?);

        let raw = fs::read(ledger.path()).await?;
        let history: UsageHistory = serde_json::from_slice(&raw)?;
        assert_eq!(
            history.summary(today).today,
            DailyUsage { input: 7, output: 3 }
        );

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
