// Source composition
pub mod gatherers;

// Publishing side
pub mod publisher;

// Receiving side
pub mod receiver;
pub mod reporter;
pub mod source_cache;

pub use gatherers::{GathererFn, Gatherers};
pub use publisher::{PublishReport, Publisher, PublisherOptions};
pub use receiver::{Handled, Receiver, ReceiverOptions};
pub use reporter::StatusReporter;
