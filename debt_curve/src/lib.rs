pub mod blockchain_manager;
pub mod cascade_simulator;
pub mod config;
pub mod debt_curve_service;
pub mod market_loader;
pub mod position_aggregator;
pub mod position_harvester;
pub mod price_oracle;
pub mod utils;
