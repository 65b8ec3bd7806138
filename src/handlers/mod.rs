pub mod attachment_handlers;
pub mod blob_handlers;
pub mod health_handlers;
pub mod note_handlers;
