//! Consumes NFC-e lookup requests, extracts the receipt from the tax
//! authority's consultation page, and routes the result to the coupon queue or
//! to a dead-letter queue.
pub mod assemble;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod crawler;
pub mod db;
pub mod error;
pub mod extract;
pub mod model;
pub mod parse;
pub mod renderer;
pub mod router;
pub mod schema;
