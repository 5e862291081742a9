use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use common::{ClosedPositionEvent, Error, Result};
use risk::RiskBudget;

/// SQLite journal of realized closures and per-engine risk budgets.
///
/// The budget snapshot lets a restarted engine resume mid-day with the loss
/// already realized and the current martingale multiplier.
#[derive(Clone)]
pub struct Journal {
    db: SqlitePool,
}

impl Journal {
    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        let journal = Self::new(db);
        journal.migrate().await?;
        info!("Journal ready");
        Ok(journal)
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let journal = Self::new(db);
        journal.migrate().await?;
        Ok(journal)
    }

    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.db).await?;
        Ok(())
    }

    /// Record one closure. Replayed events are ignored.
    pub async fn record_close(&self, event: &ClosedPositionEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO closed_positions
                (position_id, instrument, label, direction, volume, entry_price,
                 exit_price, gross_profit, reason, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(position_id) DO NOTHING
            "#,
        )
        .bind(&event.position_id)
        .bind(&event.instrument)
        .bind(&event.label)
        .bind(event.direction)
        .bind(event.volume)
        .bind(event.entry_price)
        .bind(event.exit_price)
        .bind(event.gross_profit)
        .bind(event.reason)
        .bind(event.closed_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(id = %event.position_id, profit = event.gross_profit, "Closure journaled");
        Ok(())
    }

    /// Closures recorded for one engine, oldest first.
    pub async fn closed_positions(
        &self,
        instrument: &str,
        label: &str,
    ) -> Result<Vec<ClosedPositionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT position_id, instrument, label, direction, volume, entry_price,
                   exit_price, gross_profit, reason, closed_at
            FROM closed_positions
            WHERE instrument = ?1 AND label = ?2
            ORDER BY closed_at ASC, rowid ASC
            "#,
        )
        .bind(instrument)
        .bind(label)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(closed_from_row).collect()
    }

    /// Upsert the budget snapshot for one engine. A budget that has not seen
    /// a tick yet has nothing worth saving.
    pub async fn save_budget(&self, instrument: &str, label: &str, budget: &RiskBudget) -> Result<()> {
        let Some(day) = budget.trading_day() else {
            return Ok(());
        };

        sqlx::query(
            r#"
            INSERT INTO risk_state
                (instrument, label, trading_day, realized_loss_today, loss_multiplier, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(instrument, label) DO UPDATE SET
                trading_day = excluded.trading_day,
                realized_loss_today = excluded.realized_loss_today,
                loss_multiplier = excluded.loss_multiplier,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instrument)
        .bind(label)
        .bind(day.to_string())
        .bind(budget.realized_loss_today())
        .bind(i64::from(budget.loss_multiplier()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn load_budget(&self, instrument: &str, label: &str) -> Result<Option<RiskBudget>> {
        let row = sqlx::query(
            r#"
            SELECT trading_day, realized_loss_today, loss_multiplier
            FROM risk_state
            WHERE instrument = ?1 AND label = ?2
            "#,
        )
        .bind(instrument)
        .bind(label)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let day: String = row.try_get("trading_day")?;
        let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
            .map_err(|e| Error::Config(format!("journal holds invalid trading day '{day}': {e}")))?;
        let loss: f64 = row.try_get("realized_loss_today")?;
        let multiplier: i64 = row.try_get("loss_multiplier")?;
        let multiplier = u32::try_from(multiplier)
            .ok()
            .filter(|m| *m >= 1)
            .ok_or_else(|| {
                Error::Config(format!("journal holds invalid loss multiplier {multiplier}"))
            })?;

        Ok(Some(RiskBudget::restore(day, loss, multiplier)))
    }
}

fn closed_from_row(row: &SqliteRow) -> Result<ClosedPositionEvent> {
    let closed_at: String = row.try_get("closed_at")?;
    let closed_at = DateTime::parse_from_rfc3339(&closed_at)
        .map_err(|e| Error::Config(format!("journal holds invalid timestamp '{closed_at}': {e}")))?
        .with_timezone(&Utc);

    Ok(ClosedPositionEvent {
        position_id: row.try_get("position_id")?,
        instrument: row.try_get("instrument")?,
        label: row.try_get("label")?,
        direction: row.try_get("direction")?,
        volume: row.try_get("volume")?,
        entry_price: row.try_get("entry_price")?,
        exit_price: row.try_get("exit_price")?,
        gross_profit: row.try_get("gross_profit")?,
        reason: row.try_get("reason")?,
        closed_at,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
