//! The seam between the language core and a concrete document store.
//!
//! The core never performs I/O. It lowers surface syntax to plain
//! query/update/pipeline documents (`serde_json::Value`) and issues the
//! logical operations below against handles supplied by a [`Connector`].
//! The bundled [`memory::MemoryConnector`] backs those handles with an
//! in-process store; a network driver would implement the same traits.

pub mod memory;

use std::rc::Rc;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors surfaced by a driver. These become catchable runtime exceptions
/// in scripts, coerced to their message string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    OperationFailed(String),
}

/// Options applied to find operations.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<JsonValue>,
    pub sort: Option<JsonValue>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
}

/// Result shape of an update operation.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<String>,
    pub upserted_ids: Option<Vec<String>>,
}

/// Opens database handles. The interpreter owns exactly one connector.
pub trait Connector {
    fn connect(&self, uri: &str, db_name: Option<&str>)
        -> Result<Rc<dyn DatabaseHandle>, DriverError>;
}

/// A handle to one database.
pub trait DatabaseHandle {
    fn name(&self) -> String;
    fn uri(&self) -> String;
    fn collection(&self, name: &str) -> Rc<dyn CollectionHandle>;
    fn close(&self) -> Result<(), DriverError>;
}

/// A handle to one collection. Find results are returned with their cursors
/// already folded into vectors.
pub trait CollectionHandle {
    fn find_one(
        &self,
        filter: &JsonValue,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>, DriverError>;

    fn find_many(
        &self,
        filter: &JsonValue,
        options: &FindOptions,
    ) -> Result<Vec<JsonValue>, DriverError>;

    fn insert_one(&self, doc: JsonValue) -> Result<String, DriverError>;

    fn insert_many(&self, docs: Vec<JsonValue>) -> Result<Vec<String>, DriverError>;

    fn update_one(
        &self,
        filter: &JsonValue,
        update: &JsonValue,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, DriverError>;

    fn update_many(
        &self,
        filter: &JsonValue,
        update: &JsonValue,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, DriverError>;

    fn delete_one(&self, filter: &JsonValue) -> Result<u64, DriverError>;

    fn delete_many(&self, filter: &JsonValue) -> Result<u64, DriverError>;

    fn count_documents(&self, filter: &JsonValue) -> Result<u64, DriverError>;

    fn aggregate(&self, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>, DriverError>;
}
