//! Core data models for the notes service.
//!
//! A `Note` is the unit persisted by the metadata store; its `Attachment`
//! records point at payloads held by the object store. Both serialize with
//! lowerCamel field names, which is also the persisted document layout.

pub mod attachment;
pub mod note;
pub mod page;
