//! Bulk QR-code mailer for camp registrations.
//!
//! Recipients come from the Supabase child/parent directory or from a pasted
//! JSON array, are rendered into the camp email and sent one at a time through
//! the mail relay. Finished batches are kept in a local SQLite history.

pub mod config;
pub mod db;
pub mod manual;
pub mod model;
pub mod pipeline;
pub mod relay;
pub mod render;
pub mod supabase;
