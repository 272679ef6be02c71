use std::borrow::Cow;
use std::marker::PhantomData;
use std::ops::Bound;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{keycode, valuecode};
use crate::error::{CResult, Error};
use crate::mvcc::store::{prefix_range, Key, KeyPrefix};
use crate::mvcc::transaction::Transaction;
use crate::mvcc::undo::{UndoEntry, UndoOp};
use crate::mvcc::version::VersionedValue;
use crate::mvcc::{LogId, MapId};
use crate::storage::engine::Engine;

/// How long a conflicting write sleeps before retrying.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// One transaction's view of a named map. Keys use the order-preserving key
/// encoding, values the value encoding; every slot in the backing engine
/// holds a versioned value stamped by its writer.
///
/// Reads resolve the version visible to this transaction: its own writes up
/// to the read cutoff, plus everything committed. Writes conflict per key:
/// a slot last written by another transaction that is still open is locked,
/// and only that transaction can touch it until it closes.
///
/// The read cutoff defaults to "all of my own writes". Capturing a
/// savepoint into a separate view (at_savepoint()) gives statement-stable
/// reads: writes made by the same transaction after the savepoint stay
/// invisible to that view, so a statement never chases its own updates.
pub struct TransactionMap<K, V, E: Engine> {
    txn: Transaction<E>,
    map_id: MapId,
    name: String,

    /// The read cutoff: own writes with a log id at or past this are
    /// resolved through the undo log like foreign uncommitted writes.
    read_log_id: LogId,

    _marker: PhantomData<(K, V)>,
}

impl<K, V, E: Engine> Clone for TransactionMap<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            txn: self.txn.clone(),
            map_id: self.map_id,
            name: self.name.clone(),
            read_log_id: self.read_log_id,
            _marker: PhantomData,
        }
    }
}

impl<K, V, E: Engine> TransactionMap<K, V, E> {
    pub(crate) fn new(txn: Transaction<E>, map_id: MapId, name: String) -> Self {
        Self { txn, map_id, name, read_log_id: LogId::MAX, _marker: PhantomData }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// Moves this view's read cutoff to the transaction's current log
    /// position. Reads stop seeing writes made after this call. Unlike
    /// Transaction::set_savepoint(), nothing can be rolled back to it.
    pub fn set_savepoint(&mut self) -> CResult<()> {
        self.read_log_id = self.txn.current_log_id()?;
        Ok(())
    }

    /// A new view of the same map for the given transaction, reading at the
    /// given savepoint.
    pub fn at_savepoint(&self, txn: &Transaction<E>, savepoint: LogId) -> Self {
        Self {
            txn: txn.clone(),
            map_id: self.map_id,
            name: self.name.clone(),
            read_log_id: savepoint,
            _marker: PhantomData,
        }
    }
}

impl<K, V, E> TransactionMap<K, V, E>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    E: Engine,
{
    fn slot_key(&self, key: &K) -> CResult<Vec<u8>> {
        let user_key = keycode::serialize(key)?;
        Key::Slot(self.map_id, Cow::Owned(user_key)).encode()
    }

    fn decode_user_key(&self, slot_key: &[u8]) -> CResult<K> {
        match Key::decode(slot_key)? {
            Key::Slot(_, user_key) => keycode::deserialize(user_key.as_ref()),
            key => Err(Error::InvalidData(format!("unexpected key {:?} in map keyspace", key))),
        }
    }

    /// The value visible to this transaction at its read cutoff, or None if
    /// the key is absent or deleted.
    pub fn get(&self, key: &K) -> CResult<Option<V>> {
        let slot_key = self.slot_key(key)?;
        self.read(&slot_key, self.read_log_id)
    }

    /// The value including this transaction's own writes past the read
    /// cutoff.
    pub fn get_latest(&self, key: &K) -> CResult<Option<V>> {
        let slot_key = self.slot_key(key)?;
        self.read(&slot_key, LogId::MAX)
    }

    pub fn contains_key(&self, key: &K) -> CResult<bool> {
        let slot_key = self.slot_key(key)?;
        Ok(self.resolve(&slot_key, self.read_log_id)?.map_or(false, |vv| !vv.is_tombstone()))
    }

    fn read(&self, slot_key: &[u8], max_log: LogId) -> CResult<Option<V>> {
        match self.resolve(slot_key, max_log)? {
            Some(VersionedValue { value: Some(raw), .. }) => Ok(Some(valuecode::decode(&raw)?)),
            // A tombstone reads as absent.
            _ => Ok(None),
        }
    }

    /// Resolves the versioned value visible to this transaction: walks back
    /// from the slot through the undo log until it reaches a version that is
    /// either our own below the cutoff, or committed by a closed
    /// transaction, or the beginning of the chain.
    fn resolve(&self, slot_key: &[u8], max_log: LogId) -> CResult<Option<VersionedValue>> {
        let store = self.txn.store();
        let mut data = store.slot_get(slot_key)?;
        loop {
            let Some(vv) = data else { return Ok(None) };
            if vv.tx_id == self.txn.id() {
                if vv.log_id < max_log {
                    // Our own earlier write.
                    return Ok(Some(vv));
                }
            } else if !store.is_transaction_open(vv.tx_id)? {
                // Committed by somebody else.
                return Ok(Some(vv));
            }
            // An uncommitted foreign write, or our own write past the
            // cutoff: look up the version it replaced.
            match store.undo_old(vv.tx_id, vv.log_id)? {
                Some(old) => data = old,
                // The writer finished while we were chasing it; start over
                // from the slot.
                None => data = store.slot_get(slot_key)?,
            }
        }
    }

    /// Attempts one conflict-checked write. A None value deletes the key by
    /// writing a tombstone. Returns false without blocking if the slot is
    /// locked by another open transaction, or lost a concurrent race, or —
    /// with only_if_unchanged — if the slot no longer matches what this view
    /// reads at its cutoff.
    pub fn try_set(&self, key: &K, value: Option<&V>, only_if_unchanged: bool) -> CResult<bool> {
        let user_key = keycode::serialize(key)?;
        let slot_key = Key::Slot(self.map_id, Cow::Borrowed(&user_key[..])).encode()?;
        let store = self.txn.store();
        let current = store.slot_get(&slot_key)?;

        if only_if_unchanged {
            let base = self.resolve(&slot_key, self.read_log_id)?;
            let current_payload = current.as_ref().and_then(|vv| vv.value.as_deref());
            let base_payload = base.as_ref().and_then(|vv| vv.value.as_deref());
            if current_payload != base_payload {
                match &current {
                    // Deleting a key we added or changed in this statement:
                    // treat as done, the statement made it and may drop it.
                    Some(cur) if cur.tx_id == self.txn.id() && value.is_none() => {
                        return Ok(true);
                    }
                    // Reinserting a key we deleted in this statement.
                    Some(cur) if cur.tx_id == self.txn.id() && cur.value.is_none() => {}
                    _ => return Ok(false),
                }
            }
        }

        // A slot last written by another transaction that is still open is
        // locked; fail without logging anything.
        if let Some(cur) = &current {
            if cur.tx_id != self.txn.id() && store.is_transaction_open(cur.tx_id)? {
                return Ok(false);
            }
        }

        let op = match (&current, value) {
            (None, Some(_)) => UndoOp::Add,
            (None, None) => UndoOp::Set,
            (Some(cur), Some(_)) if cur.value.is_none() => UndoOp::Add,
            (Some(cur), None) if cur.value.is_none() => UndoOp::Set,
            (Some(_), None) => UndoOp::Remove,
            (Some(_), Some(_)) => UndoOp::Set,
        };

        let encoded = value.map(valuecode::encode).transpose()?;
        // Reserve the undo entry before touching the slot: a crash in
        // between leaves an entry whose revert restores what is still there.
        let entry =
            UndoEntry { op, map_id: self.map_id, key: user_key, old: current.clone() };
        let log_id = self.txn.log_write(entry)?;
        let new = VersionedValue::new(self.txn.id(), log_id, encoded);
        if !store.slot_install(&slot_key, current.as_ref(), &new)? {
            // Lost the race for the slot; take the reservation back.
            self.txn.unlog_write()?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Attempts to set the key without blocking.
    pub fn try_put(&self, key: &K, value: &V) -> CResult<bool> {
        self.try_set(key, Some(value), false)
    }

    /// Attempts to delete the key without blocking.
    pub fn try_remove(&self, key: &K) -> CResult<bool> {
        self.try_set(key, None, false)
    }

    /// Sets the key, waiting for a conflicting transaction within the
    /// store's lock timeout. Returns the value previously visible to this
    /// view.
    pub fn put(&self, key: &K, value: &V) -> CResult<Option<V>> {
        let old = self.get(key)?;
        self.write(key, Some(value))?;
        Ok(old)
    }

    /// Deletes the key, waiting for a conflicting transaction within the
    /// store's lock timeout. Returns the value previously visible to this
    /// view.
    pub fn remove(&self, key: &K) -> CResult<Option<V>> {
        let old = self.get(key)?;
        self.write(key, None)?;
        Ok(old)
    }

    /// The blocking write: retries try_set every RETRY_INTERVAL until the
    /// lock timeout budget runs out. A zero budget fails on the first
    /// conflict.
    fn write(&self, key: &K, value: Option<&V>) -> CResult<()> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.txn.store().lock_timeout());
        loop {
            if self.try_set(key, value, false)? {
                return Ok(());
            }
            if timeout.is_zero() || started.elapsed() >= timeout {
                return Err(Error::LockTimeout(format!(
                    "key {:x?} in map {:?} is locked by another transaction",
                    keycode::serialize(key)?,
                    self.name
                )));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// The first key of the backing map. Unshielded: the key may be
    /// invisible to this transaction; combine with get() where that matters.
    pub fn first_key(&self) -> CResult<Option<K>> {
        self.seek(None)
    }

    /// The last key of the backing map. Unshielded.
    pub fn last_key(&self) -> CResult<Option<K>> {
        let prefix = KeyPrefix::Slot(self.map_id).encode()?;
        match self.txn.store().raw_last(prefix_range(&prefix))? {
            Some((slot_key, _)) => Ok(Some(self.decode_user_key(&slot_key)?)),
            None => Ok(None),
        }
    }

    /// The smallest backing key at or above the given one. Unshielded.
    pub fn ceiling_key(&self, key: &K) -> CResult<Option<K>> {
        self.seek(Some(Bound::Included(self.slot_key(key)?)))
    }

    /// The smallest backing key above the given one. Unshielded.
    pub fn higher_key(&self, key: &K) -> CResult<Option<K>> {
        self.seek(Some(Bound::Excluded(self.slot_key(key)?)))
    }

    /// The largest backing key below the given one. Unshielded.
    pub fn lower_key(&self, key: &K) -> CResult<Option<K>> {
        let prefix = KeyPrefix::Slot(self.map_id).encode()?;
        let (start, _) = prefix_range(&prefix);
        match self.txn.store().raw_last((start, Bound::Excluded(self.slot_key(key)?)))? {
            Some((slot_key, _)) => Ok(Some(self.decode_user_key(&slot_key)?)),
            None => Ok(None),
        }
    }

    fn seek(&self, start: Option<Bound<Vec<u8>>>) -> CResult<Option<K>> {
        let prefix = KeyPrefix::Slot(self.map_id).encode()?;
        let (prefix_start, end) = prefix_range(&prefix);
        let start = start.unwrap_or(prefix_start);
        match self.txn.store().raw_first((start, end))? {
            Some((slot_key, _)) => Ok(Some(self.decode_user_key(&slot_key)?)),
            None => Ok(None),
        }
    }

    /// Iterates over the keys visible to this view, in order, optionally
    /// starting from the given key. The iterator is lazy and bounded by the
    /// backing map; it cannot remove keys and cannot be restarted.
    pub fn key_iterator(&self, from: Option<&K>) -> CResult<KeyIterator<K, V, E>> {
        let prefix = KeyPrefix::Slot(self.map_id).encode()?;
        let (prefix_start, end) = prefix_range(&prefix);
        let start = match from {
            Some(key) => Bound::Included(self.slot_key(key)?),
            None => prefix_start,
        };
        Ok(KeyIterator { map: self.clone(), start, end })
    }

    /// The number of keys visible to this view. O(n): visibility is per
    /// transaction, so there is no maintained counter to read.
    pub fn len(&self) -> CResult<u64> {
        let mut count = 0;
        let mut iter = self.key_iterator(None)?;
        while iter.try_next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> CResult<bool> {
        Ok(self.key_iterator(None)?.try_next()?.is_none())
    }

    /// Removes all slots of this map directly in the backing engine. Not
    /// transactional: nothing is logged, other transactions' locks are
    /// wiped, and no rollback brings the data back.
    pub fn clear(&self) -> CResult<()> {
        self.txn.store().clear_map(self.map_id)
    }
}

/// A lazy iterator over the keys visible to one map view. Fetches one
/// backing key per step and filters invisible ones through the map's read
/// resolution.
pub struct KeyIterator<K, V, E: Engine> {
    map: TransactionMap<K, V, E>,
    start: Bound<Vec<u8>>,
    end: Bound<Vec<u8>>,
}

impl<K, V, E> KeyIterator<K, V, E>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    E: Engine,
{
    fn try_next(&mut self) -> CResult<Option<K>> {
        loop {
            let next =
                self.map.txn.store().raw_first((self.start.clone(), self.end.clone()))?;
            let Some((slot_key, _)) = next else { return Ok(None) };
            self.start = Bound::Excluded(slot_key.clone());
            if let Some(vv) = self.map.resolve(&slot_key, self.map.read_log_id)? {
                if !vv.is_tombstone() {
                    return Ok(Some(self.map.decode_user_key(&slot_key)?));
                }
            }
        }
    }
}

impl<K, V, E> Iterator for KeyIterator<K, V, E>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    E: Engine,
{
    type Item = CResult<K>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
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
    fn point_ops() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        let map = txn.open_map::<String, String>("kv")?;

        assert_eq!(map.get(&"a".to_string())?, None);
        assert_eq!(map.put(&"a".to_string(), &"1".to_string())?, None);
        assert_eq!(map.get(&"a".to_string())?, Some("1".to_string()));
        assert!(map.contains_key(&"a".to_string())?);

        // Replacing returns the old value.
        assert_eq!(map.put(&"a".to_string(), &"2".to_string())?, Some("1".to_string()));

        // Removing returns the old value and leaves the key absent.
        assert_eq!(map.remove(&"a".to_string())?, Some("2".to_string()));
        assert_eq!(map.get(&"a".to_string())?, None);
        assert!(!map.contains_key(&"a".to_string())?);

        // Removing an absent key is fine.
        assert_eq!(map.remove(&"a".to_string())?, None);

        txn.commit()?;
        Ok(())
    }

    #[test]
    fn typed_keys() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        let map = txn.open_map::<u64, String>("numbers")?;
        for n in [3u64, 1, 300, 2] {
            map.put(&n, &n.to_string())?;
        }
        // Numeric order, not byte order of some ad-hoc encoding.
        let keys = map.key_iterator(None)?.collect::<CResult<Vec<_>>>()?;
        assert_eq!(keys, vec![1, 2, 3, 300]);
        assert_eq!(map.first_key()?, Some(1));
        assert_eq!(map.last_key()?, Some(300));
        assert_eq!(map.ceiling_key(&3)?, Some(3));
        assert_eq!(map.higher_key(&3)?, Some(300));
        assert_eq!(map.lower_key(&3)?, Some(2));
        assert_eq!(map.higher_key(&300)?, None);
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn iterator_skips_invisible() -> CResult<()> {
        let store = setup()?;
        let t1 = store.begin()?;
        let m1 = t1.open_map::<String, String>("kv")?;
        m1.put(&"a".to_string(), &"1".to_string())?;
        m1.put(&"c".to_string(), &"3".to_string())?;
        t1.commit()?;

        let t2 = store.begin()?;
        let m2 = t2.open_map::<String, String>("kv")?;
        m2.put(&"b".to_string(), &"2".to_string())?;
        m2.remove(&"c".to_string())?;

        // t2 sees its own writes and deletions.
        assert_eq!(
            m2.key_iterator(None)?.collect::<CResult<Vec<_>>>()?,
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(m2.len()?, 2);

        // A concurrent transaction sees neither.
        let t3 = store.begin()?;
        let m3 = t3.open_map::<String, String>("kv")?;
        assert_eq!(
            m3.key_iterator(None)?.collect::<CResult<Vec<_>>>()?,
            vec!["a".to_string(), "c".to_string()]
        );
        assert_eq!(m3.len()?, 2);

        // Starting from a key is inclusive.
        assert_eq!(
            m2.key_iterator(Some(&"b".to_string()))?.collect::<CResult<Vec<_>>>()?,
            vec!["b".to_string()]
        );
        Ok(())
    }

    #[test]
    fn two_maps_are_disjoint() -> CResult<()> {
        let store = setup()?;
        let txn = store.begin()?;
        let left = txn.open_map::<String, u64>("left")?;
        let right = txn.open_map::<String, u64>("right")?;
        left.put(&"k".to_string(), &1)?;
        right.put(&"k".to_string(), &2)?;
        assert_eq!(left.get(&"k".to_string())?, Some(1));
        assert_eq!(right.get(&"k".to_string())?, Some(2));
        left.remove(&"k".to_string())?;
        assert_eq!(right.get(&"k".to_string())?, Some(2));
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn clear_is_not_transactional() -> CResult<()> {
        let store = setup()?;
        let t1 = store.begin()?;
        let m1 = t1.open_map::<String, String>("kv")?;
        m1.put(&"a".to_string(), &"1".to_string())?;
        t1.commit()?;

        let t2 = store.begin()?;
        let m2 = t2.open_map::<String, String>("kv")?;
        m2.clear()?;
        t2.rollback()?;

        // The rollback does not bring the data back.
        let t3 = store.begin()?;
        let m3 = t3.open_map::<String, String>("kv")?;
        assert_eq!(m3.get(&"a".to_string())?, None);
        Ok(())
    }
}
