//! Batch OCR archiver
//!
//! Walks a directory of scanned images, shrinks each one, extracts its text through
//! the Baidu OCR service and files the compressed copy plus the text away in SQLite.
//! The original is deleted once its record is committed.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
