//! Prometheus text exposition format.
//!
//! The parser feeds scraped endpoints and the self-metrics registry into the family
//! model; the renderer turns merged families back into text for the pull endpoint.

mod parser;
mod render;

pub use parser::parse_text;
pub use render::{TEXT_CONTENT_TYPE, merge_families, render_text};
