use super::{
    format_date, format_ts, json_column, parsed, parsed_opt, NewWalletTransaction, RewardStore,
    Wallet, WalletAudit, WalletMovement, WalletTransaction,
};
use crate::{
    error::{RewardError, RewardResult},
    types::{EnrollmentId, TxnReason, TxnStatus, TxnType, WalletId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use uuid::Uuid;

const TXN_COLUMNS: &str = "id, wallet_id, customer_id, txn_type, reason, status, amount,
     balance_before, balance_after, subscription_id, reward_date, metadata, created_at";

impl RewardStore {
    // ── Wallet ─────────────────────────────────────────────────────

    /// Add `amount` to the customer's wallet of `wallet_type`, creating the
    /// wallet on first credit. Runs under the database write lock, so
    /// concurrent credits to the same wallet never lose an update.
    pub fn credit_wallet(
        &self,
        customer_id: &str,
        wallet_type: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> RewardResult<WalletMovement> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let movement = credit_wallet_in(&tx, customer_id, wallet_type, amount, now)?;
        tx.commit()?;
        Ok(movement)
    }

    /// Take `amount` out of an existing wallet and record the DEBIT row in
    /// the same transaction. Returns the movement and the ledger row id.
    pub fn debit_wallet(
        &self,
        customer_id: &str,
        wallet_type: &str,
        amount: Decimal,
        reason: TxnReason,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> RewardResult<(WalletMovement, String)> {
        if amount <= Decimal::ZERO {
            return Err(RewardError::InvalidLedgerEntry {
                reason: format!("debit amount must be positive, got {amount}"),
            });
        }
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let (wallet_id, before) = wallet_balance_in(&tx, customer_id, wallet_type)?.ok_or_else(
            || RewardError::WalletNotFound {
                customer_id: customer_id.to_string(),
                wallet_type: wallet_type.to_string(),
            },
        )?;
        if before < amount {
            return Err(RewardError::InsufficientFunds {
                wallet_id,
                balance: before,
                requested: amount,
            });
        }
        let after = before - amount;
        tx.execute(
            "UPDATE wallet SET balance = ?1, updated_at = ?2 WHERE id = ?3",
            params![after.to_string(), format_ts(now), wallet_id],
        )?;
        let txn_id = append_transaction_in(
            &tx,
            &NewWalletTransaction {
                wallet_id,
                customer_id: customer_id.to_string(),
                txn_type: TxnType::Debit,
                reason,
                status: TxnStatus::Success,
                amount,
                balance_before: before,
                balance_after: after,
                subscription_id: None,
                reward_date: None,
                metadata,
            },
            now,
        )?;
        tx.commit()?;
        Ok((
            WalletMovement {
                wallet_id,
                balance_before: before,
                balance_after: after,
            },
            txn_id,
        ))
    }

    /// Append one immutable ledger row. Returns the generated id.
    pub fn append_transaction(
        &self,
        entry: &NewWalletTransaction,
        now: DateTime<Utc>,
    ) -> RewardResult<String> {
        append_transaction_in(&self.conn, entry, now)
    }

    pub fn wallet(&self, customer_id: &str, wallet_type: &str) -> RewardResult<Option<Wallet>> {
        let wallet = self
            .conn
            .query_row(
                "SELECT id, customer_id, wallet_type, balance, updated_at
                 FROM wallet WHERE customer_id = ?1 AND wallet_type = ?2",
                params![customer_id, wallet_type],
                wallet_from_row,
            )
            .optional()?;
        Ok(wallet)
    }

    pub fn wallets(&self) -> RewardResult<Vec<Wallet>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, customer_id, wallet_type, balance, updated_at
             FROM wallet ORDER BY id ASC",
        )?;
        let wallets = stmt
            .query_map([], wallet_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(wallets)
    }

    /// Ledger rows for one wallet in insertion order.
    pub fn wallet_transactions(&self, wallet_id: WalletId) -> RewardResult<Vec<WalletTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM wallet_transaction
             WHERE wallet_id = ?1 ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![wallet_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// REWARD rows written for one enrollment, oldest first.
    pub fn reward_transactions_for(
        &self,
        enrollment_id: EnrollmentId,
    ) -> RewardResult<Vec<WalletTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM wallet_transaction
             WHERE subscription_id = ?1 AND reason = 'REWARD'
             ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![enrollment_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn transaction_count(&self) -> RewardResult<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM wallet_transaction", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Recompute a wallet's balance from its ledger (CREDIT adds, DEBIT
    /// subtracts) and pair it with the cached balance.
    pub fn verify_wallet(&self, wallet_id: WalletId) -> RewardResult<WalletAudit> {
        let balance: Decimal = self.conn.query_row(
            "SELECT balance FROM wallet WHERE id = ?1",
            params![wallet_id],
            |row| parsed(row, 0),
        )?;
        let entries = self.wallet_transactions(wallet_id)?;
        let ledger_balance = entries
            .iter()
            .fold(Decimal::ZERO, |acc, t| match t.txn_type {
                TxnType::Credit => acc + t.amount,
                TxnType::Debit => acc - t.amount,
            });
        Ok(WalletAudit {
            wallet_id,
            balance,
            ledger_balance,
            entries: entries.len(),
        })
    }
}

// ── Connection-level primitives ────────────────────────────────────
//
// These take a plain &Connection so they compose inside a caller's
// transaction (a Transaction derefs to Connection).

pub(super) fn wallet_balance_in(
    conn: &Connection,
    customer_id: &str,
    wallet_type: &str,
) -> RewardResult<Option<(WalletId, Decimal)>> {
    let row = conn
        .query_row(
            "SELECT id, balance FROM wallet WHERE customer_id = ?1 AND wallet_type = ?2",
            params![customer_id, wallet_type],
            |row| Ok((row.get::<_, i64>(0)?, parsed::<Decimal>(row, 1)?)),
        )
        .optional()?;
    Ok(row)
}

pub(super) fn credit_wallet_in(
    conn: &Connection,
    customer_id: &str,
    wallet_type: &str,
    amount: Decimal,
    now: DateTime<Utc>,
) -> RewardResult<WalletMovement> {
    if amount <= Decimal::ZERO {
        return Err(RewardError::InvalidLedgerEntry {
            reason: format!("credit amount must be positive, got {amount}"),
        });
    }
    let ts = format_ts(now);
    match wallet_balance_in(conn, customer_id, wallet_type)? {
        None => {
            conn.execute(
                "INSERT INTO wallet (customer_id, wallet_type, balance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![customer_id, wallet_type, amount.to_string(), ts],
            )?;
            Ok(WalletMovement {
                wallet_id:      conn.last_insert_rowid(),
                balance_before: Decimal::ZERO,
                balance_after:  amount,
            })
        }
        Some((wallet_id, before)) => {
            let after = before
                .checked_add(amount)
                .ok_or_else(|| RewardError::InvalidLedgerEntry {
                    reason: format!("balance overflow crediting wallet {wallet_id}"),
                })?;
            conn.execute(
                "UPDATE wallet SET balance = ?1, updated_at = ?2 WHERE id = ?3",
                params![after.to_string(), ts, wallet_id],
            )?;
            Ok(WalletMovement {
                wallet_id,
                balance_before: before,
                balance_after:  after,
            })
        }
    }
}

pub(super) fn append_transaction_in(
    conn: &Connection,
    entry: &NewWalletTransaction,
    now: DateTime<Utc>,
) -> RewardResult<String> {
    validate_entry(entry)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO wallet_transaction (
            id, wallet_id, customer_id, txn_type, reason, status, amount,
            balance_before, balance_after, subscription_id, reward_date, metadata, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            entry.wallet_id,
            entry.customer_id,
            entry.txn_type.as_str(),
            entry.reason.as_str(),
            entry.status.as_str(),
            entry.amount.to_string(),
            entry.balance_before.to_string(),
            entry.balance_after.to_string(),
            entry.subscription_id,
            entry.reward_date.map(format_date),
            serde_json::to_string(&entry.metadata)?,
            format_ts(now),
        ],
    )?;
    Ok(id)
}

fn validate_entry(entry: &NewWalletTransaction) -> RewardResult<()> {
    if entry.amount <= Decimal::ZERO {
        return Err(RewardError::InvalidLedgerEntry {
            reason: format!("amount must be positive, got {}", entry.amount),
        });
    }
    let expected_after = match entry.txn_type {
        TxnType::Credit => entry.balance_before.checked_add(entry.amount),
        TxnType::Debit => entry.balance_before.checked_sub(entry.amount),
    }
    .ok_or_else(|| RewardError::InvalidLedgerEntry {
        reason: format!(
            "{} of {} from {} overflows",
            entry.txn_type.as_str(),
            entry.amount,
            entry.balance_before
        ),
    })?;
    if entry.balance_after != expected_after {
        return Err(RewardError::InvalidLedgerEntry {
            reason: format!(
                "{} of {} from {} must end at {}, got {}",
                entry.txn_type.as_str(),
                entry.amount,
                entry.balance_before,
                expected_after,
                entry.balance_after
            ),
        });
    }
    if entry.reason == TxnReason::Reward
        && (entry.subscription_id.is_none() || entry.reward_date.is_none())
    {
        return Err(RewardError::InvalidLedgerEntry {
            reason: "REWARD rows need a subscription id and reward date".into(),
        });
    }
    Ok(())
}

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id:          row.get(0)?,
        customer_id: row.get(1)?,
        wallet_type: row.get(2)?,
        balance:     parsed(row, 3)?,
        updated_at:  parsed(row, 4)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<WalletTransaction> {
    Ok(WalletTransaction {
        id:              row.get(0)?,
        wallet_id:       row.get(1)?,
        customer_id:     row.get(2)?,
        txn_type:        parsed(row, 3)?,
        reason:          parsed(row, 4)?,
        status:          parsed(row, 5)?,
        amount:          parsed(row, 6)?,
        balance_before:  parsed(row, 7)?,
        balance_after:   parsed(row, 8)?,
        subscription_id: row.get(9)?,
        reward_date:     parsed_opt(row, 10)?,
        metadata:        json_column(row, 11)?,
        created_at:      parsed(row, 12)?,
    })
}
