pub mod http_client_factory;
pub mod shutdown;

pub use http_client_factory::HttpClientFactory;
pub use shutdown::{Shutdown, ShutdownTrigger, shutdown_channel};
