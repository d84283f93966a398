pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observer;
pub mod pagination;
pub mod services;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod testing;
