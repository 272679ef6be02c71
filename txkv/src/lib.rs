//! `txkv` is a transactional key-value store: a multi-version transaction
//! layer over a plain ordered key-value engine. It provides transactional
//! maps shared by many concurrent transactions, with atomic commit,
//! isolated reads, savepoints, per-key write conflicts and crash recovery
//! through a persistent undo log. [Author fengyang]
//!
//! ## Getting started
//!
//! ```rust
//! use txkv::error::CResult;
//! use txkv::mvcc::TransactionStore;
//! use txkv::storage::memory::Memory;
//!
//! fn main() -> CResult<()> {
//!     let store = TransactionStore::open(Memory::new())?;
//!
//!     let txn = store.begin()?;
//!     let accounts = txn.open_map::<String, u64>("accounts")?;
//!     accounts.put(&"alice".to_string(), &100)?;
//!     assert_eq!(accounts.get(&"alice".to_string())?, Some(100));
//!     txn.commit()?;
//!
//!     // A later transaction sees the committed value.
//!     let txn = store.begin()?;
//!     let accounts = txn.open_map::<String, u64>("accounts")?;
//!     assert_eq!(accounts.get(&"alice".to_string())?, Some(100));
//!     txn.rollback()?;
//!
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! Durable deployments open the store over the disk engine instead; see
//! `storage::disk::DiskEngine`. Uncommitted and prepared transactions
//! survive a restart and are surfaced by
//! `TransactionStore::get_open_transactions`.

pub mod codec;
pub mod error;
pub mod mvcc;
pub mod storage;
