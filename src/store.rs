//! sled-backed record store
//!
//! Every record kind lives in its own tree and is stored as a minicbor
//! encoding. Keys are the bech32 record id, or `{parent_id}/{record_id}` for
//! rows that are listed per parent (events and audit entries).
use std::path::Path;
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Tree};

use crate::error::{Error, Result, WorkflowError};

pub struct Store {
    db: Arc<Db>,
    pub(crate) submissions: Tree,
    pub(crate) years: Tree,
    // label -> year id
    pub(crate) year_labels: Tree,
    pub(crate) categories: Tree,
    pub(crate) subcategories: Tree,
    pub(crate) budgets: Tree,
    pub(crate) events: Tree,
    // submission id -> LedgerTotals
    pub(crate) ledgers: Tree,
    pub(crate) audit: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<Db>) -> Result<Self> {
        Ok(Self {
            submissions: db.open_tree("submissions")?,
            years: db.open_tree("years")?,
            year_labels: db.open_tree("year_labels")?,
            categories: db.open_tree("categories")?,
            subcategories: db.open_tree("subcategories")?,
            budgets: db.open_tree("budgets")?,
            events: db.open_tree("events")?,
            ledgers: db.open_tree("ledgers")?,
            audit: db.open_tree("audit")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn get<T>(&self, tree: &Tree, key: &str) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put<T: minicbor::Encode<()>>(&self, tree: &Tree, key: &str, value: &T) -> Result<()> {
        tree.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    pub(crate) fn scan_prefix<T>(&self, tree: &Tree, prefix: &str) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        tree.scan_prefix(prefix.as_bytes())
            .map(|row| {
                let (_, bytes) = row?;
                decode(&bytes)
            })
            .collect()
    }

    pub(crate) fn scan_all<T>(&self, tree: &Tree) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.scan_prefix(tree, "")
    }
}

pub(crate) fn child_key(parent_id: &str, id: &str) -> String {
    format!("{parent_id}/{id}")
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

/// Result type of a sled transaction closure aborting with our [`Error`].
pub(crate) type TxResult<T> = ConflictableTransactionResult<T, Error>;

pub(crate) fn fail<T>(error: impl Into<Error>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(error.into()))
}

pub(crate) fn tx_get<T>(tree: &TransactionalTree, key: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => decode(&bytes).map(Some).map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

/// Loads a record that must exist, aborting with `missing` otherwise.
pub(crate) fn tx_require<T>(tree: &TransactionalTree, key: &str, missing: WorkflowError) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx_get(tree, key)? {
        Some(value) => Ok(value),
        None => fail(missing),
    }
}

pub(crate) fn tx_put<T: minicbor::Encode<()>>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
    let bytes = encode(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}
