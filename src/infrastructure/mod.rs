pub mod codec;
pub mod core;
pub mod exposition;
pub mod memory_broker;
pub mod observability;
pub mod scrape;

pub use memory_broker::{MemoryBroker, MemoryClient};
pub use scrape::ScrapeGatherer;
