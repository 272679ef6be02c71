//! This mod implements a multi-version transaction layer over a plain
//! ordered key-value engine: it turns the engine's byte keyspace into
//! transactional maps shared by many concurrent transactions, with atomic
//! commit, isolated reads and durable undo for rollback and crash recovery.
//!
//!
//! VERSIONED SLOTS
//! ===============
//! Every entry of a transactional map stores exactly one versioned value:
//! the user value stamped with the id of the transaction that wrote it and
//! that transaction's write counter (the log id). There is no separate
//! committed copy; commit does not rewrite slots. Instead, readers decide
//! what a slot means by asking whether its writer is still open:
//!
//! * written by me, before my read cutoff: visible.
//! * written by a transaction that has closed: visible, it committed.
//! * written by an open transaction (or by me past the cutoff): invisible;
//!   follow the writer's undo entry to the value the slot held before, and
//!   repeat.
//!
//! Deletes write a tombstone (a versioned value with no payload) rather
//! than removing the slot, so this chain stays walkable while the deleting
//! transaction is open. Commit turns a final tombstone into a physical
//! delete.
//!
//!
//! UNDO LOG
//! ========
//! Every write first appends one entry to a persistent undo log, keyed by
//! (transaction id, log id): the operation kind, the map, the key, and the
//! value the slot held before. The undo log is the single source of truth
//! for what is uncommitted:
//!
//! * commit walks a transaction's entries forward and deletes them;
//! * rollback walks them backward, restoring each slot, then deletes them;
//! * a savepoint is just a log position, and partial rollback stops there;
//! * a transaction is "open" exactly while it has entries in the log, which
//!   is also how a restart finds the transactions to recover;
//! * readers chase (transaction id, log id) pointers through it to find the
//!   version they are allowed to see.
//!
//!
//! LOCKING
//! =======
//! There are no map-level locks. A slot whose last writer is still open is
//! locked by that writer; any other transaction's write to it fails
//! immediately and may be retried within the store's lock timeout budget.
//! First committer wins on conflicting keys; readers never block writers
//! and writers never block readers.

pub mod map;
pub mod store;
pub mod transaction;
pub mod undo;
pub mod version;


pub use map::{KeyIterator, TransactionMap};
pub use store::TransactionStore;
pub use transaction::{Transaction, TransactionStatus};
pub use undo::{UndoEntry, UndoOp};
pub use version::VersionedValue;

/// A transaction identifier. Monotonically increasing, allocated by the
/// store, never reused across restarts.
pub type TxId = u64;

/// A position in one transaction's undo log, starting at 0 and incremented
/// once per write.
pub type LogId = u64;

/// A map identifier, allocated by the catalog when a map name is first
/// opened.
pub type MapId = u32;
