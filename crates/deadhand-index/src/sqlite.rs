//! SQLite record store.
//!
//! Every operation opens its own connection and drops it on return; nothing
//! holds a process-wide handle. Mutations run in `IMMEDIATE` transactions so
//! concurrent writers serialize on the database lock instead of failing
//! half-way.

use crate::{RecordStore, StoreError};
use deadhand_core::{
    Address, BeneficiaryRecord, InactivityUnit, InactivityWindow, NewRecord, RecordId, RecordKey,
    Timestamp,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = "id, owner, beneficiary, wallet, allocation, duration, unit, \
                              last_checkin, created_at";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Raw column values of one `beneficiary_records` row.
struct StoredRow {
    id: i64,
    owner: String,
    beneficiary: String,
    wallet: String,
    allocation: i64,
    duration: i64,
    unit: String,
    last_checkin: i64,
    created_at: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            beneficiary: row.get(2)?,
            wallet: row.get(3)?,
            allocation: row.get(4)?,
            duration: row.get(5)?,
            unit: row.get(6)?,
            last_checkin: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<BeneficiaryRecord, StoreError> {
        let corrupt = |what: &str, detail: String| {
            StoreError::Corrupt(format!("record {}: {} ({})", self.id, what, detail))
        };
        let address = |value: &str, what: &str| -> Result<Address, StoreError> {
            value.parse().map_err(|e: deadhand_core::AddressError| corrupt(what, e.to_string()))
        };

        let unit: InactivityUnit = self.unit.parse().map_err(|e: deadhand_core::ValidationError| {
            corrupt("unit", e.to_string())
        })?;
        let duration =
            u32::try_from(self.duration).map_err(|e| corrupt("duration", e.to_string()))?;
        let window =
            InactivityWindow::new(duration, unit).map_err(|e| corrupt("window", e.to_string()))?;
        let allocation =
            u64::try_from(self.allocation).map_err(|e| corrupt("allocation", e.to_string()))?;

        Ok(BeneficiaryRecord {
            id: RecordId(self.id),
            owner: address(&self.owner, "owner")?,
            beneficiary: address(&self.beneficiary, "beneficiary")?,
            wallet: address(&self.wallet, "wallet")?,
            allocation,
            window,
            last_checkin: Timestamp::from_millis(self.last_checkin),
            created_at: Timestamp::from_millis(self.created_at),
        })
    }
}

/// Durable [`RecordStore`] backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;

        // WAL so readers don't block on the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;

        log::info!("Record store ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn query_records(
        &self,
        filter: &str,
        value: &Address,
    ) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM beneficiary_records WHERE {} = ?1 ORDER BY id",
            RECORD_COLUMNS, filter
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![value.to_string()], StoredRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredRow::into_record).collect()
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS beneficiary_records (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            owner        TEXT NOT NULL,
            beneficiary  TEXT NOT NULL,
            wallet       TEXT NOT NULL,
            allocation   INTEGER NOT NULL CHECK (allocation > 0),
            duration     INTEGER NOT NULL CHECK (duration > 0),
            unit         TEXT NOT NULL CHECK (unit IN ('minutes', 'hours', 'days')),
            last_checkin INTEGER NOT NULL,
            created_at   INTEGER NOT NULL,
            UNIQUE (owner, beneficiary)
        );

        CREATE INDEX IF NOT EXISTS idx_records_beneficiary
            ON beneficiary_records (beneficiary);
        CREATE INDEX IF NOT EXISTS idx_records_wallet
            ON beneficiary_records (wallet);

        CREATE TABLE IF NOT EXISTS closed_wallets (
            wallet    TEXT PRIMARY KEY,
            owner     TEXT NOT NULL,
            closed_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn select_one(conn: &Connection, key: &RecordKey) -> Result<Option<BeneficiaryRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM beneficiary_records WHERE owner = ?1 AND beneficiary = ?2",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let row = stmt
        .query_row(
            params![key.owner.to_string(), key.beneficiary.to_string()],
            StoredRow::from_row,
        )
        .optional()?;
    row.map(StoredRow::into_record).transpose()
}

fn closed_at(conn: &Connection, wallet: &Address) -> Result<Option<Timestamp>, StoreError> {
    let ms: Option<i64> = conn
        .query_row(
            "SELECT closed_at FROM closed_wallets WHERE wallet = ?1",
            params![wallet.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(ms.map(Timestamp::from_millis))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl RecordStore for SqliteStore {
    fn create(&self, record: &NewRecord, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        record.validate()?;
        let key = record.key();
        let allocation = i64::try_from(record.allocation)
            .map_err(|_| deadhand_core::ValidationError::AllocationTooLarge(record.allocation))?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(closed) = closed_at(&tx, &record.wallet)? {
            if closed >= at {
                return Err(StoreError::WalletClosed {
                    wallet: record.wallet,
                    closed_at: closed,
                });
            }
            // Confirmed after the closure: the wallet is in use again
            tx.execute(
                "DELETE FROM closed_wallets WHERE wallet = ?1",
                params![record.wallet.to_string()],
            )?;
        }

        let inserted = tx.execute(
            "INSERT INTO beneficiary_records
                (owner, beneficiary, wallet, allocation, duration, unit, last_checkin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                record.owner.to_string(),
                record.beneficiary.to_string(),
                record.wallet.to_string(),
                allocation,
                i64::from(record.window.duration()),
                record.window.unit().as_str(),
                at.as_millis(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Duplicate(key)),
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(BeneficiaryRecord {
            id: RecordId(id),
            owner: record.owner,
            beneficiary: record.beneficiary,
            wallet: record.wallet,
            allocation: record.allocation,
            window: record.window,
            last_checkin: at,
            created_at: at,
        })
    }

    fn get(&self, key: &RecordKey) -> Result<Option<BeneficiaryRecord>, StoreError> {
        let conn = self.connect()?;
        select_one(&conn, key)
    }

    fn list_by_owner(&self, owner: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.query_records("owner", owner)
    }

    fn list_by_beneficiary(
        &self,
        beneficiary: &Address,
    ) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.query_records("beneficiary", beneficiary)
    }

    fn list_by_wallet(&self, wallet: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.query_records("wallet", wallet)
    }

    fn touch(&self, key: &RecordKey, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE beneficiary_records SET last_checkin = MAX(last_checkin, ?1)
             WHERE owner = ?2 AND beneficiary = ?3",
            params![
                at.as_millis(),
                key.owner.to_string(),
                key.beneficiary.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(*key));
        }
        let record = select_one(&tx, key)?.ok_or(StoreError::NotFound(*key))?;
        tx.commit()?;
        Ok(record)
    }

    fn remove(&self, key: &RecordKey) -> Result<BeneficiaryRecord, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = select_one(&tx, key)?.ok_or(StoreError::NotFound(*key))?;
        tx.execute(
            "DELETE FROM beneficiary_records WHERE id = ?1",
            params![record.id.0],
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn remove_all_for_wallet(
        &self,
        owner: &Address,
        wallet: &Address,
        at: Timestamp,
    ) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let foreign: i64 = tx.query_row(
            "SELECT COUNT(*) FROM beneficiary_records WHERE wallet = ?1 AND owner != ?2",
            params![wallet.to_string(), owner.to_string()],
            |row| row.get(0),
        )?;
        if foreign > 0 {
            log::warn!("Wallet {} is indexed under another owner than {}", wallet, owner);
            return Ok(0);
        }

        // Records created after the closure belong to a re-opened wallet
        let deleted = tx.execute(
            "DELETE FROM beneficiary_records
             WHERE owner = ?1 AND wallet = ?2 AND created_at <= ?3",
            params![owner.to_string(), wallet.to_string(), at.as_millis()],
        )?;

        let closed = closed_at(&tx, wallet)?.map_or(at, |existing| existing.max(at));
        let reopened: i64 = tx.query_row(
            "SELECT COUNT(*) FROM beneficiary_records WHERE wallet = ?1 AND created_at > ?2",
            params![wallet.to_string(), closed.as_millis()],
            |row| row.get(0),
        )?;
        if reopened == 0 {
            tx.execute(
                "INSERT INTO closed_wallets (wallet, owner, closed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (wallet) DO UPDATE SET
                    owner = excluded.owner,
                    closed_at = MAX(closed_at, excluded.closed_at)",
                params![wallet.to_string(), owner.to_string(), at.as_millis()],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn wallet_closed_at(&self, wallet: &Address) -> Result<Option<Timestamp>, StoreError> {
        let conn = self.connect()?;
        closed_at(&conn, wallet)
    }
}
