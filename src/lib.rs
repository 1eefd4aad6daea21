pub mod cache;
pub mod coingecko;
pub mod config;
pub mod models;
pub mod service;
pub mod throttle;
pub mod web;
