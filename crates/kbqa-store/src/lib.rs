//! KBQA Store - Fact triple storage
//!
//! Provides `FactStore` implementations over MySQL and memory, and a
//! reader for NLPCC-style `entity ||| attribute ||| answer` triple files.

pub mod memory;
pub mod mysql_store;
pub mod triples;

pub use memory::InMemoryFactStore;
pub use mysql_store::MySqlFactStore;
pub use triples::{parse_triples, read_triples_file};
