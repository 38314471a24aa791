//! Log clustering: local grouping (§4.3) plus the historical-extension
//! orchestration that turns groups into annotated clusters (§4.6).
pub mod clusterizer;
pub mod service;

pub use clusterizer::cluster as cluster_messages;
pub use service::{cluster_num, not_found, ClusterOptions, ClusterService};
