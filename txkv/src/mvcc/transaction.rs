use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::mvcc::map::TransactionMap;
use crate::mvcc::store::TransactionStore;
use crate::mvcc::undo::UndoEntry;
use crate::mvcc::{LogId, TxId};
use crate::storage::engine::Engine;

/// The lifecycle status of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepting reads and writes.
    Open,
    /// Persisted for a two-phase commit; only commit and rollback remain.
    Prepared,
    /// Committed or rolled back. A closed transaction cannot be reused.
    Closed,
}

/// A transaction over the shared store. Cheap to clone; clones share the
/// same lifecycle state, which is how the transaction's maps reach it. A
/// transaction is meant to be driven by one thread at a time; concurrency
/// is between transactions, not within one.
///
/// All writes go through a per-write undo entry, so an unfinished
/// transaction can always be rolled back, including after a crash. Commit
/// and rollback close the transaction; operations on a closed transaction
/// fail.
pub struct Transaction<E: Engine> {
    store: TransactionStore<E>,
    inner: Arc<Inner>,
}

struct Inner {
    id: TxId,

    /// The store's flush generation when the transaction began.
    start_version: u64,

    state: Mutex<State>,
}

struct State {
    status: TransactionStatus,

    /// An optional name. Setting one persists the transaction record, so it
    /// survives restarts like a prepared transaction.
    name: Option<String>,

    /// The next undo log position; counts the transaction's writes.
    log_id: LogId,
}

impl<E: Engine> Clone for Transaction<E> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), inner: self.inner.clone() }
    }
}

impl<E: Engine> std::fmt::Debug for Transaction<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.inner.id).finish()
    }
}

impl<E: Engine> Transaction<E> {
    pub(crate) fn begin(store: TransactionStore<E>, id: TxId, start_version: u64) -> Self {
        Self::make(store, id, start_version, TransactionStatus::Open, None, 0)
    }

    /// Rebuilds a transaction handle from its persisted traces, after a
    /// restart or from another store handle.
    pub(crate) fn recover(
        store: TransactionStore<E>,
        id: TxId,
        status: TransactionStatus,
        name: Option<String>,
        log_id: LogId,
    ) -> Self {
        Self::make(store, id, 0, status, name, log_id)
    }

    fn make(
        store: TransactionStore<E>,
        id: TxId,
        start_version: u64,
        status: TransactionStatus,
        name: Option<String>,
        log_id: LogId,
    ) -> Self {
        Self {
            store,
            inner: Arc::new(Inner {
                id,
                start_version,
                state: Mutex::new(State { status, name, log_id }),
            }),
        }
    }

    fn state(&self) -> CResult<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::Internal("transaction mutex poisoned".to_string()))
    }

    pub fn id(&self) -> TxId {
        self.inner.id
    }

    /// The store's flush generation when this transaction began.
    pub fn start_version(&self) -> u64 {
        self.inner.start_version
    }

    pub fn status(&self) -> CResult<TransactionStatus> {
        Ok(self.state()?.status)
    }

    pub fn name(&self) -> CResult<Option<String>> {
        Ok(self.state()?.name.clone())
    }

    /// Names the transaction. A named transaction is persisted like a
    /// prepared one and survives restarts until committed or rolled back.
    /// Only allowed while open.
    pub fn set_name(&self, name: &str) -> CResult<()> {
        let mut state = self.state()?;
        require_open(&state, self.id())?;
        state.name = Some(name.to_string());
        self.store.store_transaction(self.id(), state.status, state.name.as_deref())
    }

    /// Prepares the transaction for a two-phase commit, persisting it.
    /// Commit and rollback remain legal; everything else is refused.
    pub fn prepare(&self) -> CResult<()> {
        let mut state = self.state()?;
        require_open(&state, self.id())?;
        state.status = TransactionStatus::Prepared;
        self.store.store_transaction(self.id(), state.status, state.name.as_deref())
    }

    /// Captures the current undo log position. Use with
    /// rollback_to_savepoint() to revert the writes made after it, or with
    /// TransactionMap::at_savepoint() for statement-stable reads.
    pub fn set_savepoint(&self) -> CResult<LogId> {
        let state = self.state()?;
        require_open(&state, self.id())?;
        Ok(state.log_id)
    }

    /// Commits the transaction's writes and closes it.
    pub fn commit(&self) -> CResult<()> {
        let mut state = self.state()?;
        check_not_closed(&state, self.id())?;
        self.store.commit(self.id(), state.log_id)?;
        self.store.end_transaction(
            self.id(),
            state.status == TransactionStatus::Prepared || state.name.is_some(),
        )?;
        state.status = TransactionStatus::Closed;
        Ok(())
    }

    /// Reverts all of the transaction's writes and closes it.
    pub fn rollback(&self) -> CResult<()> {
        let mut state = self.state()?;
        check_not_closed(&state, self.id())?;
        self.store.rollback_to(self.id(), state.log_id, 0)?;
        self.store.end_transaction(
            self.id(),
            state.status == TransactionStatus::Prepared || state.name.is_some(),
        )?;
        state.status = TransactionStatus::Closed;
        state.log_id = 0;
        Ok(())
    }

    /// Reverts the writes made since the savepoint, newest first, and
    /// resets the undo log position to it. The transaction stays open.
    pub fn rollback_to_savepoint(&self, savepoint: LogId) -> CResult<()> {
        let mut state = self.state()?;
        require_open(&state, self.id())?;
        if savepoint > state.log_id {
            return Err(Error::InvalidInput(format!(
                "savepoint {} is beyond the transaction's log position {}",
                savepoint, state.log_id
            )));
        }
        self.store.rollback_to(self.id(), state.log_id, savepoint)?;
        state.log_id = savepoint;
        Ok(())
    }

    /// Opens a transactional map with the given name, bound to this
    /// transaction. The map's key type is stored with the order-preserving
    /// key encoding, the value type with the value encoding.
    pub fn open_map<K, V>(&self, name: &str) -> CResult<TransactionMap<K, V, E>> {
        {
            let state = self.state()?;
            require_open(&state, self.id())?;
        }
        let map_id = self.store.open_map(name)?;
        Ok(TransactionMap::new(self.clone(), map_id, name.to_string()))
    }

    /// The distinct names of maps this transaction changed at or after the
    /// given savepoint.
    pub fn changed_maps(&self, savepoint: LogId) -> CResult<BTreeSet<String>> {
        let state = self.state()?;
        self.store.changed_maps(self.id(), savepoint, state.log_id)
    }

    pub(crate) fn store(&self) -> &TransactionStore<E> {
        &self.store
    }

    /// Reserves the next undo log position and appends the entry to it.
    /// Writes are refused once the transaction is closed.
    pub(crate) fn log_write(&self, entry: UndoEntry) -> CResult<LogId> {
        let mut state = self.state()?;
        check_not_closed(&state, self.id())?;
        let log_id = state.log_id;
        self.store.log(self.id(), log_id, &entry)?;
        state.log_id += 1;
        Ok(log_id)
    }

    /// Takes back the most recently reserved undo entry, after the write
    /// lost its slot race.
    pub(crate) fn unlog_write(&self) -> CResult<()> {
        let mut state = self.state()?;
        if state.log_id == 0 {
            return Err(Error::Internal(format!(
                "transaction {} has no undo entry to take back",
                self.id()
            )));
        }
        state.log_id -= 1;
        self.store.unlog(self.id(), state.log_id)
    }

    pub(crate) fn current_log_id(&self) -> CResult<LogId> {
        Ok(self.state()?.log_id)
    }
}

fn require_open(state: &State, id: TxId) -> CResult<()> {
    if state.status != TransactionStatus::Open {
        return Err(Error::InvalidState(format!("transaction {} is not open", id)));
    }
    Ok(())
}

fn check_not_closed(state: &State, id: TxId) -> CResult<()> {
    if state.status == TransactionStatus::Closed {
        return Err(Error::InvalidState(format!("transaction {} is closed", id)));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mvcc::store::TransactionStore;
    use crate::storage::memory::Memory;

    fn setup() -> CResult<TransactionStore<Memory>> {
        TransactionStore::open(Memory::new())
    }

    #[test]
    fn lifecycle() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        assert_eq!(txn.status()?, TransactionStatus::Open);

        txn.prepare()?;
        assert_eq!(txn.status()?, TransactionStatus::Prepared);

        // A prepared transaction refuses everything but commit and rollback.
        assert!(matches!(txn.prepare(), Err(Error::InvalidState(_))));
        assert!(matches!(txn.set_name("late"), Err(Error::InvalidState(_))));
        assert!(matches!(txn.set_savepoint(), Err(Error::InvalidState(_))));
        assert!(matches!(txn.open_map::<String, String>("m"), Err(Error::InvalidState(_))));

        txn.commit()?;
        assert_eq!(txn.status()?, TransactionStatus::Closed);

        // A closed transaction cannot be reused.
        assert!(matches!(txn.commit(), Err(Error::InvalidState(_))));
        assert!(matches!(txn.rollback(), Err(Error::InvalidState(_))));
        assert!(matches!(txn.prepare(), Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn savepoint_bounds() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        assert_eq!(txn.set_savepoint()?, 0);
        assert!(matches!(txn.rollback_to_savepoint(1), Err(Error::InvalidInput(_))));
        txn.rollback()?;
        Ok(())
    }

    #[test]
    fn name_requires_open() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        txn.set_name("report")?;
        assert_eq!(txn.name()?, Some("report".to_string()));
        txn.rollback()?;
        assert!(matches!(txn.set_name("late"), Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn ids_are_monotonic() -> CResult<()> {
        let store = setup()?;
        let a = store.begin()?;
        let b = store.begin()?;
        let c = store.begin()?;
        assert!(a.id() < b.id() && b.id() < c.id());
        Ok(())
    }
}
