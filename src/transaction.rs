//! Transactions over a [`LedgerExecutor`]
//!
//! Each migration runs inside one of these. The transaction issues `BEGIN`
//! when opened and must be finished with [`Transaction::commit`] or
//! [`Transaction::rollback`]; one dropped while still open is rolled back.

use crate::executor::{ExecutorError, LedgerExecutor};

pub struct Transaction<'a> {
    executor: &'a dyn LedgerExecutor,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Start a transaction.
    pub fn begin(executor: &'a dyn LedgerExecutor) -> Result<Self, ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("tidemark.transaction.begin").entered();

        executor.execute("BEGIN")?;
        Ok(Self {
            executor,
            closed: false,
        })
    }

    pub fn executor(&self) -> &'a dyn LedgerExecutor {
        self.executor
    }

    pub fn execute(&self, sql: &str) -> Result<u64, ExecutorError> {
        self.executor.execute(sql)
    }

    pub fn commit(mut self) -> Result<(), ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("tidemark.transaction.commit").entered();

        self.closed = true;
        self.executor.execute("COMMIT")?;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("tidemark.transaction.rollback").entered();

        self.closed = true;
        self.executor.execute("ROLLBACK")?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.executor.execute("ROLLBACK") {
                log::warn!("Failed to roll back abandoned transaction: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockExecutor;

    #[test]
    fn test_commit() {
        let executor = MockExecutor::new();
        let tx = Transaction::begin(&executor).unwrap();
        tx.execute("CREATE TABLE t (id INTEGER)").unwrap();
        tx.commit().unwrap();
        assert_eq!(
            executor.executed(),
            ["BEGIN", "CREATE TABLE t (id INTEGER)", "COMMIT"]
        );
    }

    #[test]
    fn test_drop_rolls_back() {
        let executor = MockExecutor::new();
        {
            let tx = Transaction::begin(&executor).unwrap();
            assert!(!tx.is_closed());
        }
        assert_eq!(executor.executed(), ["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_explicit_rollback_is_not_repeated() {
        let executor = MockExecutor::new();
        let tx = Transaction::begin(&executor).unwrap();
        tx.rollback().unwrap();
        assert_eq!(executor.executed(), ["BEGIN", "ROLLBACK"]);
    }
}
