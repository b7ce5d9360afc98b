pub mod comparator;
pub mod config;
pub mod database;
pub mod error;
pub mod language;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod sandbox;
pub mod strategy;
pub mod worker;
pub mod workspace;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
