use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_derive::{Deserialize, Serialize};

use crate::codec::{keycode, valuecode};
use crate::error::{CResult, Error};
use crate::mvcc::transaction::{Transaction, TransactionStatus};
use crate::mvcc::undo::{UndoEntry, UndoOp};
use crate::mvcc::version::VersionedValue;
use crate::mvcc::{LogId, MapId, TxId};
use crate::storage::engine::Engine;

/// Number of transaction ids covered by one persisted ceiling. The settings
/// entry is only rewritten when the counter crosses the ceiling, so after a
/// crash up to this many ids are skipped, never reused.
const TX_ID_BATCH: u64 = 64;

/// Engine writes allowed to accumulate before the store forces a flush.
/// Bounds buffered data during long transactions and large commits.
const MAX_UNSAVED_WRITES: usize = 4096;

/// The settings entry holding the persisted transaction id ceiling, as an
/// ASCII decimal string.
const SETTING_LAST_TX_ID: &str = "lastTransactionId";

/// The settings entry holding the last allocated map id.
const SETTING_LAST_MAP_ID: &str = "lastMapId";

/// Keys of the shared engine keyspace, using the keycode encoding which
/// preserves the ordering and grouping of keys. Cow byte slices allow
/// encoding borrowed values and decoding into owned values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Key<'a> {
    /// Store-wide settings by well-known name, e.g. "lastTransactionId".
    Setting(Cow<'a, str>),

    /// Prepared or named transactions that must survive a restart, by id.
    Prepared(TxId),

    /// Undo log entries by (transaction id, log id). Scanning a transaction's
    /// range yields its writes in log order.
    Undo(TxId, LogId),

    /// Map catalog: map name to map id.
    MapName(Cow<'a, str>),

    /// Reverse map catalog: map id to map name.
    MapMeta(MapId),

    /// A slot of a transactional map, holding a versioned value.
    Slot(
        MapId,
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
}

impl<'a> Key<'a> {
    pub fn decode(bytes: &'a [u8]) -> CResult<Self> {
        keycode::deserialize(bytes)
    }

    pub fn encode(&self) -> CResult<Vec<u8>> {
        keycode::serialize(self)
    }
}

/// Key prefixes, for prefix scans. These must match the keys above,
/// including the enum variant index.
#[derive(Clone, Debug, Serialize)]
pub(crate) enum KeyPrefix {
    #[allow(dead_code)]
    Setting,

    Prepared,

    Undo,

    #[allow(dead_code)]
    MapName,

    #[allow(dead_code)]
    MapMeta,

    Slot(MapId),
}

impl KeyPrefix {
    pub(crate) fn encode(&self) -> CResult<Vec<u8>> {
        keycode::serialize(self)
    }
}

/// The persisted record of a prepared or named transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct PreparedRecord {
    status: TransactionStatus,
    name: Option<String>,
}

/// The half-open range of engine keys starting with the given prefix.
pub(crate) fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = Bound::Included(prefix.to_vec());
    let end = match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => Bound::Excluded(
            prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
        ),
        None => Bound::Unbounded,
    };
    (start, end)
}

/// The transaction registry: shares one backing engine between all
/// transactions, allocates transaction ids, appends and consumes the undo
/// log, and drives commit, rollback and recovery.
///
/// The store is a cheap cloneable handle; clones share the same engine and
/// bookkeeping. Bookkeeping (id allocation, undo appends relative to status
/// changes, recovery scans) is serialized under one internal mutex, while
/// slot reads and writes only take the engine mutex, so readers never block
/// on a long commit.
pub struct TransactionStore<E: Engine> {
    /// The backing engine, shared by all transactions.
    engine: Arc<Mutex<E>>,

    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,

    /// Write-conflict retry budget in milliseconds. 0 fails conflicting
    /// writes immediately.
    lock_timeout: AtomicU64,

    /// Engine writes since the last flush, for flush batching.
    unsaved_writes: AtomicUsize,

    /// Bumped on every store-driven flush. Transactions record it as their
    /// start version.
    flush_generation: AtomicU64,
}

struct Inner {
    /// The last transaction id handed out. May run ahead of the persisted
    /// ceiling by up to TX_ID_BATCH.
    last_transaction_id: TxId,

    /// The id ceiling stored in settings. Never smaller than any id in use,
    /// so a recovered store cannot reuse ids.
    persisted_transaction_id: TxId,

    /// The last allocated map id.
    last_map_id: MapId,

    /// Lower-bound hint for open transactions: the smallest transaction id
    /// in the undo log, or None when unknown. Reset when that transaction
    /// ends and lazily recomputed.
    first_open: Option<TxId>,
}

impl<E: Engine> Clone for TransactionStore<E> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), shared: self.shared.clone() }
    }
}

impl<E: Engine> TransactionStore<E> {
    /// Opens the transaction store over a backing engine, recovering its
    /// persisted state. Fails if the persisted transaction id ceiling is
    /// smaller than a prepared transaction's id, since ids could then be
    /// reused.
    ///
    /// Transactions that were open, prepared or named when the engine was
    /// last written survive here; fetch them with get_open_transactions()
    /// and commit or roll them back.
    pub fn open(engine: E) -> CResult<Self> {
        let engine = Arc::new(Mutex::new(engine));

        let mut guard =
            engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".to_string()))?;
        let last_transaction_id = read_setting(&mut *guard, SETTING_LAST_TX_ID)?.unwrap_or(0);
        let last_map_id = read_setting(&mut *guard, SETTING_LAST_MAP_ID)?.unwrap_or(0) as MapId;

        // Check the prepared transactions against the persisted ceiling.
        let mut prepared = 0;
        let mut last_prepared = None;
        {
            let prefix = KeyPrefix::Prepared.encode()?;
            let mut scan = guard.scan(prefix_range(&prefix));
            while let Some((key, _)) = scan.next().transpose()? {
                if let Key::Prepared(id) = Key::decode(&key)? {
                    prepared += 1;
                    last_prepared = Some(id);
                }
            }
        }
        if let Some(id) = last_prepared {
            if id > last_transaction_id {
                return Err(Error::InvalidState(format!(
                    "persisted last transaction id {} is smaller than prepared transaction {}",
                    last_transaction_id, id
                )));
            }
        }

        // Seed the open-transaction hint from the undo log's first key.
        let mut first_open = None;
        {
            let prefix = KeyPrefix::Undo.encode()?;
            let mut scan = guard.scan(prefix_range(&prefix));
            if let Some((key, _)) = scan.next().transpose()? {
                if let Key::Undo(id, _) = Key::decode(&key)? {
                    first_open = Some(id);
                }
            }
        }
        drop(guard);

        if prepared > 0 || first_open.is_some() {
            log::info!(
                "recovered transaction store: {} prepared transaction(s), first open transaction {:?}",
                prepared,
                first_open
            );
        }

        Ok(Self {
            engine,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    last_transaction_id,
                    persisted_transaction_id: last_transaction_id,
                    last_map_id,
                    first_open,
                }),
                lock_timeout: AtomicU64::new(0),
                unsaved_writes: AtomicUsize::new(0),
                flush_generation: AtomicU64::new(0),
            }),
        })
    }

    fn engine(&self) -> CResult<MutexGuard<'_, E>> {
        self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".to_string()))
    }

    fn inner(&self) -> CResult<MutexGuard<'_, Inner>> {
        self.shared.inner.lock().map_err(|_| Error::Internal("store mutex poisoned".to_string()))
    }

    /// Begins a new transaction with a fresh id. Every TX_ID_BATCH ids the
    /// persisted ceiling is pushed ahead, so a crash never hands out an id
    /// twice; the counter after recovery resumes from the ceiling, not the
    /// last id actually used.
    pub fn begin(&self) -> CResult<Transaction<E>> {
        let mut inner = self.inner()?;
        let id = inner.last_transaction_id + 1;
        inner.last_transaction_id = id;
        if id > inner.persisted_transaction_id {
            inner.persisted_transaction_id += TX_ID_BATCH;
            let ceiling = inner.persisted_transaction_id;
            write_setting(&mut *self.engine()?, SETTING_LAST_TX_ID, ceiling)?;
        }
        drop(inner);
        log::debug!("beginning transaction {}", id);
        Ok(Transaction::begin(self.clone(), id, self.flush_generation()))
    }

    /// The write-conflict retry budget in milliseconds. 0 means conflicting
    /// writes fail immediately.
    pub fn lock_timeout(&self) -> u64 {
        self.shared.lock_timeout.load(Ordering::Relaxed)
    }

    /// Sets the write-conflict retry budget in milliseconds.
    pub fn set_lock_timeout(&self, millis: u64) {
        self.shared.lock_timeout.store(millis, Ordering::Relaxed);
    }

    /// The disk space used by the backing engine, live and garbage.
    pub fn disk_space_used(&self) -> CResult<u64> {
        Ok(self.engine()?.status()?.total_disk_size)
    }

    pub(crate) fn flush_generation(&self) -> u64 {
        self.shared.flush_generation.load(Ordering::Relaxed)
    }

    /// Persists a transaction's status record, keeping it visible across
    /// restarts. Called when a transaction is named or prepared.
    pub(crate) fn store_transaction(
        &self,
        id: TxId,
        status: TransactionStatus,
        name: Option<&str>,
    ) -> CResult<()> {
        let _inner = self.inner()?;
        let record = PreparedRecord { status, name: name.map(|n| n.to_string()) };
        self.engine()?.set(&Key::Prepared(id).encode()?, valuecode::encode(&record)?)
    }

    /// Appends an undo entry for a transaction's write. The entry must exist
    /// before the slot changes, so a crash in between leaves nothing that
    /// cannot be reverted.
    pub(crate) fn log(&self, id: TxId, log_id: LogId, entry: &UndoEntry) -> CResult<()> {
        let mut inner = self.inner()?;
        // Keep the hint a valid lower bound: an older transaction may log
        // its first write after the hint was computed.
        if let Some(first) = inner.first_open {
            if id < first {
                inner.first_open = Some(id);
            }
        }
        self.engine()?.set(&Key::Undo(id, log_id).encode()?, entry.encode())?;
        drop(inner);
        self.bump_unsaved(1)
    }

    /// Removes the most recent undo entry of a transaction, after the write
    /// it was reserved for lost its race for the slot.
    pub(crate) fn unlog(&self, id: TxId, log_id: LogId) -> CResult<()> {
        let _inner = self.inner()?;
        self.engine()?.delete(&Key::Undo(id, log_id).encode()?)
    }

    /// Commits a transaction's writes: walks its undo log forward, turning
    /// final tombstones into physical deletes, and removes each entry. The
    /// slot values themselves already carry the transaction's id; once the
    /// transaction ends, readers treat them as visible.
    pub(crate) fn commit(&self, id: TxId, max_log_id: LogId) -> CResult<()> {
        log::debug!("committing transaction {} with {} undo entries", id, max_log_id);
        for log_id in 0..max_log_id {
            let undo_key = Key::Undo(id, log_id).encode()?;
            let mut engine = self.engine()?;
            let raw = match engine.get(&undo_key)? {
                Some(raw) => raw,
                None => continue,
            };
            let entry = UndoEntry::decode(&raw)?;
            if entry.op == UndoOp::Remove {
                // If the transaction's last visible write to the slot was a
                // delete, remove the key physically.
                let slot_key = Key::Slot(entry.map_id, Cow::Borrowed(&entry.key[..])).encode()?;
                if let Some(slot_raw) = engine.get(&slot_key)? {
                    if VersionedValue::decode(&slot_raw)?.is_tombstone() {
                        engine.delete(&slot_key)?;
                    }
                }
            }
            engine.delete(&undo_key)?;
            drop(engine);
            self.bump_unsaved(2)?;
        }
        Ok(())
    }

    /// Reverts a transaction's writes from max_log_id (exclusive) back down
    /// to to_log_id (inclusive), restoring each slot to the value recorded
    /// in the undo entry and removing the entry.
    pub(crate) fn rollback_to(&self, id: TxId, max_log_id: LogId, to_log_id: LogId) -> CResult<()> {
        log::debug!(
            "rolling back transaction {} from log id {} to {}",
            id,
            max_log_id,
            to_log_id
        );
        for log_id in (to_log_id..max_log_id).rev() {
            let undo_key = Key::Undo(id, log_id).encode()?;
            let mut engine = self.engine()?;
            let raw = match engine.get(&undo_key)? {
                Some(raw) => raw,
                None => continue,
            };
            let entry = UndoEntry::decode(&raw)?;
            let slot_key = Key::Slot(entry.map_id, Cow::Borrowed(&entry.key[..])).encode()?;
            match &entry.old {
                Some(old) => engine.set(&slot_key, old.encode())?,
                None => engine.delete(&slot_key)?,
            }
            engine.delete(&undo_key)?;
            drop(engine);
            self.bump_unsaved(2)?;
        }
        Ok(())
    }

    /// Ends a transaction: drops its persisted status record if it had one,
    /// and resets the open-transaction hint if it pointed here.
    pub(crate) fn end_transaction(&self, id: TxId, persisted: bool) -> CResult<()> {
        let mut inner = self.inner()?;
        if persisted {
            self.engine()?.delete(&Key::Prepared(id).encode()?)?;
        }
        if inner.first_open == Some(id) {
            inner.first_open = None; // recomputed from the undo log on next use
        }
        Ok(())
    }

    /// Whether the given transaction has uncommitted writes. Transactions
    /// below the first-open hint are known closed without touching the
    /// engine; otherwise the undo log is probed for a key with this id.
    pub fn is_transaction_open(&self, id: TxId) -> CResult<bool> {
        let mut inner = self.inner()?;
        if let Some(first) = self.first_open_transaction(&mut inner)? {
            if id < first {
                return Ok(false);
            }
        }
        let start = Key::Undo(id, 0).encode()?;
        let mut engine = self.engine()?;
        let mut scan = engine.scan((Bound::Included(start), Bound::Unbounded));
        match scan.next().transpose()? {
            Some((key, _)) => Ok(matches!(Key::decode(&key)?, Key::Undo(tx, _) if tx == id)),
            None => Ok(false),
        }
    }

    /// The lower-bound hint for open transactions, recomputing it from the
    /// undo log's first key when unknown.
    fn first_open_transaction(&self, inner: &mut Inner) -> CResult<Option<TxId>> {
        if inner.first_open.is_none() {
            let prefix = KeyPrefix::Undo.encode()?;
            let mut engine = self.engine()?;
            let mut scan = engine.scan(prefix_range(&prefix));
            if let Some((key, _)) = scan.next().transpose()? {
                if let Key::Undo(id, _) = Key::decode(&key)? {
                    inner.first_open = Some(id);
                }
            }
        }
        Ok(inner.first_open)
    }

    /// All transactions that are not yet closed: every prepared or named
    /// transaction, plus every transaction with entries in the undo log.
    /// After a restart these are the transactions an operator must commit
    /// or roll back; their log position is recovered from the undo log.
    pub fn get_open_transactions(&self) -> CResult<Vec<Transaction<E>>> {
        let _inner = self.inner()?;
        let mut found: BTreeMap<TxId, (TransactionStatus, Option<String>, LogId)> = BTreeMap::new();

        {
            let mut engine = self.engine()?;
            let prefix = KeyPrefix::Prepared.encode()?;
            let mut scan = engine.scan(prefix_range(&prefix));
            while let Some((key, value)) = scan.next().transpose()? {
                if let Key::Prepared(id) = Key::decode(&key)? {
                    let record: PreparedRecord = valuecode::decode(&value)?;
                    found.insert(id, (record.status, record.name, 0));
                }
            }
        }

        {
            let mut engine = self.engine()?;
            let prefix = KeyPrefix::Undo.encode()?;
            let mut scan = engine.scan(prefix_range(&prefix));
            while let Some((key, _)) = scan.next().transpose()? {
                if let Key::Undo(id, log_id) = Key::decode(&key)? {
                    let entry =
                        found.entry(id).or_insert((TransactionStatus::Open, None, 0));
                    entry.2 = entry.2.max(log_id + 1);
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(id, (status, name, log_id))| {
                Transaction::recover(self.clone(), id, status, name, log_id)
            })
            .collect())
    }

    /// The distinct names of maps a transaction touched in the given undo
    /// log range. Maps dropped in the meantime are skipped.
    pub(crate) fn changed_maps(
        &self,
        id: TxId,
        from_log_id: LogId,
        to_log_id: LogId,
    ) -> CResult<BTreeSet<String>> {
        let mut map_ids = BTreeSet::new();
        {
            let start = Key::Undo(id, from_log_id).encode()?;
            let end = Key::Undo(id, to_log_id).encode()?;
            let mut engine = self.engine()?;
            let mut scan = engine.scan((Bound::Included(start), Bound::Excluded(end)));
            while let Some((_, value)) = scan.next().transpose()? {
                map_ids.insert(UndoEntry::decode(&value)?.map_id);
            }
        }
        let mut names = BTreeSet::new();
        for map_id in map_ids {
            if let Some(name) = self.map_name(map_id)? {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Resolves a map id to its catalog name.
    pub(crate) fn map_name(&self, map_id: MapId) -> CResult<Option<String>> {
        match self.engine()?.get(&Key::MapMeta(map_id).encode()?)? {
            Some(raw) => Ok(Some(valuecode::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Looks up or creates the catalog entries for a named map.
    pub(crate) fn open_map(&self, name: &str) -> CResult<MapId> {
        let mut inner = self.inner()?;
        let name_key = Key::MapName(name.into()).encode()?;
        let mut engine = self.engine()?;
        if let Some(raw) = engine.get(&name_key)? {
            return valuecode::decode(&raw);
        }
        inner.last_map_id += 1;
        let map_id = inner.last_map_id;
        write_setting(&mut *engine, SETTING_LAST_MAP_ID, map_id as u64)?;
        engine.set(&name_key, valuecode::encode(&map_id)?)?;
        engine.set(&Key::MapMeta(map_id).encode()?, valuecode::encode(&name.to_string())?)?;
        log::debug!("created map {:?} with id {}", name, map_id);
        Ok(map_id)
    }

    /// Renames a map. This is not transactional: the new name is visible to
    /// everyone immediately and is not undone by any rollback.
    pub fn rename_map(&self, name: &str, new_name: &str) -> CResult<()> {
        let _inner = self.inner()?;
        let mut engine = self.engine()?;
        let name_key = Key::MapName(name.into()).encode()?;
        let new_name_key = Key::MapName(new_name.into()).encode()?;
        let raw = engine.get(&name_key)?.ok_or_else(|| {
            Error::InvalidInput(format!("map {:?} does not exist", name))
        })?;
        if engine.get(&new_name_key)?.is_some() {
            return Err(Error::InvalidInput(format!("map {:?} already exists", new_name)));
        }
        let map_id: MapId = valuecode::decode(&raw)?;
        engine.delete(&name_key)?;
        engine.set(&new_name_key, valuecode::encode(&map_id)?)?;
        engine.set(&Key::MapMeta(map_id).encode()?, valuecode::encode(&new_name.to_string())?)?;
        Ok(())
    }

    /// Removes a map and all its slots. This is not transactional: slots
    /// locked by open transactions are removed along with everything else,
    /// and nothing is logged to the undo log.
    pub fn remove_map(&self, name: &str) -> CResult<bool> {
        let _inner = self.inner()?;
        let mut engine = self.engine()?;
        let name_key = Key::MapName(name.into()).encode()?;
        let raw = match engine.get(&name_key)? {
            Some(raw) => raw,
            None => return Ok(false),
        };
        let map_id: MapId = valuecode::decode(&raw)?;
        clear_slots(&mut *engine, map_id)?;
        engine.delete(&name_key)?;
        engine.delete(&Key::MapMeta(map_id).encode()?)?;
        Ok(true)
    }

    /// Removes all slots of a map, without logging anything. Not
    /// transactional.
    pub(crate) fn clear_map(&self, map_id: MapId) -> CResult<()> {
        clear_slots(&mut *self.engine()?, map_id)
    }

    /// Closes the store: persists the exact last transaction id, so the ids
    /// skipped by batching are reclaimed on the next open, and flushes the
    /// engine.
    pub fn close(&self) -> CResult<()> {
        let inner = self.inner()?;
        let mut engine = self.engine()?;
        write_setting(&mut *engine, SETTING_LAST_TX_ID, inner.last_transaction_id)?;
        engine.flush()
    }

    /// Reads the raw versioned value of a slot.
    pub(crate) fn slot_get(&self, slot_key: &[u8]) -> CResult<Option<VersionedValue>> {
        match self.engine()?.get(slot_key)? {
            Some(raw) => Ok(Some(VersionedValue::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Atomically replaces a slot if it still holds the expected value,
    /// compare-and-swap style: the read, comparison and write happen under
    /// one engine guard. Returns false if the slot changed in the meantime.
    pub(crate) fn slot_install(
        &self,
        slot_key: &[u8],
        expected: Option<&VersionedValue>,
        new: &VersionedValue,
    ) -> CResult<bool> {
        let mut engine = self.engine()?;
        let current = engine.get(slot_key)?;
        let unchanged = match (&current, expected) {
            (None, None) => true,
            (Some(raw), Some(expected)) => *raw == expected.encode(),
            _ => false,
        };
        if !unchanged {
            return Ok(false);
        }
        engine.set(slot_key, new.encode())?;
        drop(engine);
        self.bump_unsaved(1)?;
        Ok(true)
    }

    /// Reads the old value recorded in a transaction's undo entry. The outer
    /// None means the entry no longer exists, i.e. the transaction finished
    /// committing or rolling back while the caller was chasing it.
    pub(crate) fn undo_old(&self, id: TxId, log_id: LogId) -> CResult<Option<Option<VersionedValue>>> {
        match self.engine()?.get(&Key::Undo(id, log_id).encode()?)? {
            Some(raw) => Ok(Some(UndoEntry::decode(&raw)?.old)),
            None => Ok(None),
        }
    }

    /// The first raw key/value pair in the range, if any.
    pub(crate) fn raw_first(
        &self,
        range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
    ) -> CResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut engine = self.engine()?;
        let mut scan = engine.scan(range);
        scan.next().transpose()
    }

    /// The last raw key/value pair in the range, if any.
    pub(crate) fn raw_last(
        &self,
        range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
    ) -> CResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut engine = self.engine()?;
        let mut scan = engine.scan(range);
        scan.next_back().transpose()
    }

    /// Counts an engine write towards the flush budget, flushing when the
    /// budget is used up.
    fn bump_unsaved(&self, n: usize) -> CResult<()> {
        let unsaved = self.shared.unsaved_writes.fetch_add(n, Ordering::Relaxed) + n;
        if unsaved >= MAX_UNSAVED_WRITES {
            self.shared.unsaved_writes.store(0, Ordering::Relaxed);
            self.shared.flush_generation.fetch_add(1, Ordering::Relaxed);
            log::debug!("flushing backing engine after {} unsaved writes", unsaved);
            self.engine()?.flush()?;
        }
        Ok(())
    }
}

fn clear_slots<E: Engine>(engine: &mut E, map_id: MapId) -> CResult<()> {
    let prefix = KeyPrefix::Slot(map_id).encode()?;
    let keys = engine
        .scan(prefix_range(&prefix))
        .map(|item| item.map(|(key, _)| key))
        .collect::<CResult<Vec<_>>>()?;
    for key in keys {
        engine.delete(&key)?;
    }
    Ok(())
}

fn read_setting<E: Engine>(engine: &mut E, name: &str) -> CResult<Option<u64>> {
    let Some(raw) = engine.get(&Key::Setting(name.into()).encode()?)? else {
        return Ok(None);
    };
    let text = String::from_utf8(raw)?;
    let n = text
        .parse::<u64>()
        .map_err(|err| Error::InvalidData(format!("invalid setting {}={:?}: {}", name, text, err)))?;
    Ok(Some(n))
}

fn write_setting<E: Engine>(engine: &mut E, name: &str, value: u64) -> CResult<()> {
    engine.set(&Key::Setting(name.into()).encode()?, value.to_string().into_bytes())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::memory::Memory;

    #[test]
    /// The keyspace regions must sort in declaration order, and composite
    /// keys by their components, since every scan relies on it.
    fn key_order() -> CResult<()> {
        let keys = [
            Key::Setting("lastTransactionId".into()),
            Key::Prepared(1),
            Key::Prepared(2),
            Key::Undo(1, 0),
            Key::Undo(1, 1),
            Key::Undo(2, 0),
            Key::MapName("accounts".into()),
            Key::MapMeta(1),
            Key::Slot(1, vec![0x00].into()),
            Key::Slot(1, vec![0x01].into()),
            Key::Slot(2, vec![].into()),
        ];
        let encoded = keys.iter().map(|k| k.encode()).collect::<CResult<Vec<_>>>()?;
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);

        // And they round-trip.
        for (key, bytes) in keys.iter().zip(encoded.iter()) {
            assert_eq!(&Key::decode(bytes)?, key);
        }
        Ok(())
    }

    #[test]
    /// Prefixes must be byte prefixes of their keys.
    fn key_prefixes() -> CResult<()> {
        let pairs = [
            (KeyPrefix::Setting.encode()?, Key::Setting("x".into()).encode()?),
            (KeyPrefix::Prepared.encode()?, Key::Prepared(7).encode()?),
            (KeyPrefix::Undo.encode()?, Key::Undo(7, 3).encode()?),
            (KeyPrefix::MapName.encode()?, Key::MapName("m".into()).encode()?),
            (KeyPrefix::MapMeta.encode()?, Key::MapMeta(9).encode()?),
            (KeyPrefix::Slot(9).encode()?, Key::Slot(9, vec![1, 2].into()).encode()?),
        ];
        for (prefix, key) in pairs {
            assert!(key.starts_with(&prefix), "{:x?} not a prefix of {:x?}", prefix, key);
        }
        // A slot prefix must not match another map's slots.
        let other = Key::Slot(10, vec![1].into()).encode()?;
        assert!(!other.starts_with(&KeyPrefix::Slot(9).encode()?));
        Ok(())
    }

    #[test]
    /// Transaction ids are persisted in batches: the ceiling moves every
    /// TX_ID_BATCH ids, and a reopened store resumes past the ceiling.
    fn transaction_id_batching() -> CResult<()> {
        let store = TransactionStore::open(Memory::new())?;
        let t1 = store.begin()?;
        assert_eq!(t1.id(), 1);
        t1.rollback()?;

        // The persisted ceiling after the first begin is the batch size.
        let raw = store.engine()?.get(&Key::Setting(SETTING_LAST_TX_ID.into()).encode()?)?;
        assert_eq!(raw, Some(b"64".to_vec()));

        // A store recovered from the same engine skips to the ceiling.
        let engine = store.engine.clone();
        drop(t1);
        drop(store);
        let engine = Arc::try_unwrap(engine)
            .map_err(|_| Error::Internal("engine still shared".to_string()))?
            .into_inner()
            .map_err(|_| Error::Internal("engine mutex poisoned".to_string()))?;
        let store = TransactionStore::open(engine)?;
        let t2 = store.begin()?;
        assert_eq!(t2.id(), 65);
        Ok(())
    }

    #[test]
    /// close() persists the exact last id, so no ids are skipped.
    fn close_persists_exact_id() -> CResult<()> {
        let store = TransactionStore::open(Memory::new())?;
        store.begin()?.rollback()?;
        store.begin()?.rollback()?;
        store.close()?;
        let raw = store.engine()?.get(&Key::Setting(SETTING_LAST_TX_ID.into()).encode()?)?;
        assert_eq!(raw, Some(b"2".to_vec()));
        Ok(())
    }

    #[test]
    /// A prepared transaction beyond the persisted ceiling fails recovery.
    fn open_detects_inconsistent_state() -> CResult<()> {
        let mut engine = Memory::new();
        let record = PreparedRecord { status: TransactionStatus::Prepared, name: None };
        engine.set(&Key::Prepared(9).encode()?, valuecode::encode(&record)?)?;
        // No settings entry: the persisted last id defaults to 0.
        assert!(matches!(TransactionStore::open(engine), Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn prepared_record_roundtrip() -> CResult<()> {
        let record =
            PreparedRecord { status: TransactionStatus::Prepared, name: Some("tx1".to_string()) };
        assert_eq!(
            valuecode::decode::<PreparedRecord>(&valuecode::encode(&record)?)?,
            record
        );
        Ok(())
    }
}
