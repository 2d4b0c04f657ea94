pub mod archive;
pub mod config;
pub mod diagnose;
pub mod dialect;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod hierarchy;
pub mod meta;
pub mod names;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod taxon;
pub mod workspace;

pub use error::DwcaError;
pub use normalize::{Archive, NormalizeSummary};
