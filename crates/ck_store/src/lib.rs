//! ck_store — Local key store for Chatkeys
//!
//! # Storage strategy
//! A small document store on top of SQLite (sqlx):
//! - Each declared collection is one table of `(pk, doc)` rows, where `doc`
//!   is the JSON-serialised record and `pk` is copied from the collection's
//!   primary-key field.
//! - Secondary indices are SQLite expression indices over
//!   `json_extract(doc, '$.<field>')`, usable for range queries.
//! - Every logical operation is a single SQL statement, so it is atomic on
//!   its own; partial writes are never observable.
//!
//! Key material stored here is already wrapped by `ck_crypto`; this crate
//! never sees a raw private key.

pub mod db;
pub mod error;
pub mod keystore;
pub mod models;
pub mod schema;

pub use db::{Database, IndexValue};
pub use error::StoreError;
pub use keystore::KeyStore;
pub use models::{EncryptedKeyRecord, NewKeyRecord};
pub use schema::{CollectionSchema, IndexSchema};
