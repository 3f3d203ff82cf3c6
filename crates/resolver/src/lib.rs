pub mod orchestrator;
pub mod scan;

pub use orchestrator::{select_cached, Resolver, ResolverOptions};
pub use scan::{expand_cidr, ScanReport};
