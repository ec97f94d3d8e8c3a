pub mod cancellation;
pub mod column_mapper;
pub mod duplicate;
pub mod geo;
pub mod import_processor;
pub mod ledger;
pub mod normalizer;
pub mod report;
pub mod run_lock;
pub mod runner;
