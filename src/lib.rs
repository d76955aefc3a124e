// src/lib.rs
// Kalshi mention-market NO-side bot

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod kalshi;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod policy;
pub mod scanner;
pub mod types;
