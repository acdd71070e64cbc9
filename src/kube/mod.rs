//! Kubernetes API access for Tekton objects
//!
//! `client` talks to the API server for the tools, `watch` feeds the
//! resource cache from the pipeline run watch stream.

pub mod client;
pub mod models;
pub mod watch;
