//! Spend tracking across concurrent assessments
//!
//! [`BudgetGuard`] enforces three ceilings at once: per item, per batch and
//! lifetime. Paid stages reserve their nominal cost before dispatch and commit
//! the billed cost afterwards. Checking and reserving happen under one lock,
//! so concurrent workers can never jointly overshoot a ceiling with their
//! reservations.
//!
//! The lifetime counter survives restarts through a small JSON ledger.

use crate::cache::write_atomic;
use crate::config::{BudgetConfig, Config, ConfigManager};
use crate::error::{MediagateError, MediagateResult};
use crate::observe::Observable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Tolerance for accumulated floating point error in ceiling checks
const EPSILON: f64 = 1e-9;

/// Configured ceilings
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetLimits {
    pub per_item: f64,
    pub per_batch: f64,
    pub lifetime: f64,
}

impl BudgetLimits {
    /// Limits that reject non-positive or non-finite ceilings
    pub fn new(per_item: f64, per_batch: f64, lifetime: f64) -> MediagateResult<Self> {
        for (name, value) in [
            ("per_item_limit", per_item),
            ("per_batch_limit", per_batch),
            ("lifetime_limit", lifetime),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(MediagateError::BudgetConfig(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(Self {
            per_item,
            per_batch,
            lifetime,
        })
    }

    pub fn from_config(config: &BudgetConfig) -> MediagateResult<Self> {
        Self::new(
            config.per_item_limit,
            config.per_batch_limit,
            config.lifetime_limit,
        )
    }
}

/// Spend of one asset's assessment
#[derive(Debug, Default)]
pub struct ItemSpend {
    spent: f64,
    reserved: f64,
}

impl ItemSpend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed spend so far
    pub fn spent(&self) -> f64 {
        self.spent
    }
}

/// Budget held for one stage call. Must be committed or released.
#[derive(Debug)]
#[must_use = "a reservation holds budget until committed or released"]
pub struct Reservation {
    amount: f64,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// Read-only view of the guard's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetState {
    pub batch: f64,
    pub lifetime: f64,
    /// Everything committed since the guard was created
    pub run_total: f64,
    pub reserved: f64,
    pub outstanding: usize,
    pub refusals: u64,
    /// Spend billed beyond what was reserved for it
    pub overage: f64,
    pub limits: BudgetLimits,
}

impl BudgetState {
    pub fn batch_remaining(&self) -> f64 {
        (self.limits.per_batch - self.batch - self.reserved).max(0.0)
    }

    pub fn lifetime_remaining(&self) -> f64 {
        (self.limits.lifetime - self.lifetime - self.reserved).max(0.0)
    }

    /// Whether billed spend went past a batch or lifetime ceiling
    pub fn is_over_limit(&self) -> bool {
        self.batch > self.limits.per_batch + EPSILON || self.lifetime > self.limits.lifetime + EPSILON
    }
}

#[derive(Debug, Default)]
struct Counters {
    batch: f64,
    lifetime: f64,
    run_total: f64,
    reserved: f64,
    outstanding: usize,
    refusals: u64,
    overage: f64,
}

/// Persisted lifetime spend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub lifetime_spent: f64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub batches: u64,
}

impl Ledger {
    /// Read a ledger; a missing file is an empty ledger, an unreadable one an error
    pub async fn load(path: &Path) -> MediagateResult<Option<Self>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MediagateError::io(
                    format!("reading budget ledger {}", path.display()),
                    e,
                ))
            }
        };

        let ledger: Ledger =
            serde_json::from_slice(&bytes).map_err(|e| MediagateError::LedgerCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !ledger.lifetime_spent.is_finite() || ledger.lifetime_spent < 0.0 {
            return Err(MediagateError::LedgerCorrupt {
                path: path.to_path_buf(),
                reason: format!("lifetime_spent is {}", ledger.lifetime_spent),
            });
        }
        Ok(Some(ledger))
    }

    pub async fn save(&self, path: &Path) -> MediagateResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| MediagateError::Internal(format!("ledger write task failed: {}", e)))?
            .map_err(|e| MediagateError::io(format!("writing budget ledger {}", path.display()), e))
    }
}

/// Thread-safe tri-level spend tracker
#[derive(Debug)]
pub struct BudgetGuard {
    limits: BudgetLimits,
    counters: Mutex<Counters>,
    ledger_path: Option<PathBuf>,
    batches: Mutex<u64>,
}

impl BudgetGuard {
    /// A guard with no persisted history
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            counters: Mutex::new(Counters::default()),
            ledger_path: None,
            batches: Mutex::new(0),
        }
    }

    /// A guard whose lifetime counter starts from the ledger at `path`
    pub async fn with_ledger(limits: BudgetLimits, path: PathBuf) -> MediagateResult<Self> {
        let ledger = Ledger::load(&path).await?;
        let guard = Self::new(limits);
        if let Some(ref ledger) = ledger {
            debug!(
                "Loaded budget ledger: {:.4} spent over {} batch(es)",
                ledger.lifetime_spent, ledger.batches
            );
            guard.lock().lifetime = ledger.lifetime_spent;
            *guard.lock_batches() = ledger.batches;
        }
        Ok(Self {
            ledger_path: Some(path),
            ..guard
        })
    }

    /// Guard for a loaded configuration
    pub async fn from_config(config: &Config) -> MediagateResult<Self> {
        let limits = BudgetLimits::from_config(&config.budget)?;
        if config.budget.persist_lifetime {
            Self::with_ledger(limits, ConfigManager::budget_ledger_path(config)).await
        } else {
            Ok(Self::new(limits))
        }
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_batches(&self) -> MutexGuard<'_, u64> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve `cost` if every ceiling can absorb it
    pub fn can_afford(&self, item: &mut ItemSpend, cost: f64) -> Option<Reservation> {
        if !cost.is_finite() || cost < 0.0 {
            warn!("Refusing reservation for invalid cost {}", cost);
            return None;
        }

        let mut c = self.lock();
        let item_ok = item.spent + item.reserved + cost <= self.limits.per_item + EPSILON;
        let batch_ok = c.batch + c.reserved + cost <= self.limits.per_batch + EPSILON;
        let lifetime_ok = c.lifetime + c.reserved + cost <= self.limits.lifetime + EPSILON;

        if !(item_ok && batch_ok && lifetime_ok) {
            c.refusals += 1;
            debug!(
                "Budget refused {:.4} (item ok: {}, batch ok: {}, lifetime ok: {})",
                cost, item_ok, batch_ok, lifetime_ok
            );
            return None;
        }

        c.reserved += cost;
        c.outstanding += 1;
        item.reserved += cost;
        Some(Reservation { amount: cost })
    }

    /// Replace a reservation with the cost actually incurred.
    ///
    /// The full billed amount is recorded even when it exceeds the
    /// reservation. The excess is tracked as overage, and the inflated
    /// counters refuse later reservations.
    pub fn commit(&self, item: &mut ItemSpend, reservation: Reservation, actual: f64) {
        let actual = if actual.is_finite() && actual >= 0.0 {
            actual
        } else {
            warn!(
                "Invalid billed cost {}, committing reserved {:.4}",
                actual, reservation.amount
            );
            reservation.amount
        };

        let mut c = self.lock();
        Self::unreserve(&mut c, item, &reservation);
        Self::charge(&mut c, item, actual, reservation.amount);
    }

    /// Record spend that had no reservation, such as a cost reported by a
    /// stage configured as free
    pub fn record(&self, item: &mut ItemSpend, actual: f64) {
        if !actual.is_finite() || actual < 0.0 {
            warn!("Ignoring invalid unreserved cost {}", actual);
            return;
        }
        if actual == 0.0 {
            return;
        }

        let mut c = self.lock();
        Self::charge(&mut c, item, actual, 0.0);
    }

    fn charge(c: &mut Counters, item: &mut ItemSpend, actual: f64, reserved: f64) {
        c.batch += actual;
        c.lifetime += actual;
        c.run_total += actual;
        item.spent += actual;

        if actual > reserved + EPSILON {
            c.overage += actual - reserved;
            warn!("Billed cost {:.4} exceeded reservation {:.4}", actual, reserved);
        }
    }

    /// Drop a reservation without spending it
    pub fn release(&self, item: &mut ItemSpend, reservation: Reservation) {
        let mut c = self.lock();
        Self::unreserve(&mut c, item, &reservation);
    }

    fn unreserve(c: &mut Counters, item: &mut ItemSpend, reservation: &Reservation) {
        c.reserved = (c.reserved - reservation.amount).max(0.0);
        c.outstanding = c.outstanding.saturating_sub(1);
        item.reserved = (item.reserved - reservation.amount).max(0.0);
    }

    pub fn snapshot(&self) -> BudgetState {
        let c = self.lock();
        BudgetState {
            batch: c.batch,
            lifetime: c.lifetime,
            run_total: c.run_total,
            reserved: c.reserved,
            outstanding: c.outstanding,
            refusals: c.refusals,
            overage: c.overage,
            limits: self.limits,
        }
    }

    /// Reset the batch counter before a new batch
    pub fn begin_batch(&self) {
        let mut c = self.lock();
        if c.outstanding > 0 {
            warn!(
                "Starting a batch with {} outstanding reservation(s)",
                c.outstanding
            );
        }
        c.batch = 0.0;
        drop(c);
        *self.lock_batches() += 1;
    }

    /// Write the lifetime counter to the ledger, if this guard has one
    pub async fn save(&self) -> MediagateResult<()> {
        let Some(ref path) = self.ledger_path else {
            return Ok(());
        };

        let ledger = Ledger {
            lifetime_spent: self.snapshot().lifetime,
            updated_at: Utc::now(),
            batches: *self.lock_batches(),
        };
        ledger.save(path).await?;
        info!(
            "Budget ledger saved: {:.4} of {:.4} lifetime",
            ledger.lifetime_spent, self.limits.lifetime
        );
        Ok(())
    }
}

impl Observable for BudgetGuard {
    fn component(&self) -> &'static str {
        "budget"
    }

    fn stats(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}
