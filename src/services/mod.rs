//! Gateway services: the signing engine, range validation, edge cache,
//! streaming proxy, and the metadata side-table.

pub mod cache;
pub mod metadata;
pub mod proxy;
pub mod range;
pub mod signer;
pub mod tee;
