//! Mirror a hierarchical wiki to local disk.
//!
//! A run authenticates, walks the navigation tree, writes each page's content
//! and metadata, downloads the attachments referenced from that content, and
//! finally produces flat copies of every output tree for bulk ingestion.

pub mod attachments;
pub mod backup;
pub mod client;
pub mod config;
pub mod extract;
pub mod filesystem;
pub mod flatten;
pub mod pages;
pub mod runtime;
pub mod tree;
