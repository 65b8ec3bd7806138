//! Store clients, the coordinator that spans them, and search.

pub mod coordinator;
pub mod metadata_store;
pub mod object_store;
pub mod search;

#[cfg(test)]
pub mod testing;
