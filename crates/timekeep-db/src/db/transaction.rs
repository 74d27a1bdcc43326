//! Database transaction utilities
//!
//! Multi-statement writes (invitation acceptance creates a user and closes the
//! invitation) go through [`TransactionGuard`] so both statements commit or
//! neither does.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// Owns an open transaction until it is committed or rolled back.
///
/// Dropping the guard without finishing it lets sqlx roll the transaction back
/// when the connection returns to the pool; the drop is logged so missed commits
/// show up.
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&pool, "accept_invitation").await?;
/// sqlx::query("INSERT INTO users ...").execute(tx.conn()?).await?;
/// sqlx::query("UPDATE invitations ...").execute(tx.conn()?).await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard {
    transaction: Option<Transaction<'static, Postgres>>,
    label: &'static str,
}

impl TransactionGuard {
    pub async fn begin(pool: &PgPool, label: &'static str) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .with_context(|| format!("Failed to begin transaction for {}", label))?;

        Ok(Self {
            transaction: Some(transaction),
            label,
        })
    }

    /// Connection bound to the open transaction.
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        let label = self.label;
        self.transaction
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| anyhow::anyhow!("Transaction for {} already finished", label))
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .with_context(|| format!("Failed to commit transaction for {}", self.label))?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()
                .await
                .with_context(|| format!("Failed to roll back transaction for {}", self.label))?;
        }
        Ok(())
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            tracing::warn!(
                transaction = self.label,
                "Transaction dropped without commit or rollback, it will be rolled back"
            );
        }
    }
}
