//! Graph algorithms over the issue dependency DAG.
//!
//! The storage layer answers most readiness questions in SQL; this crate
//! holds the pure-graph pieces shared by the in-memory backend, cycle
//! rejection, and wave (swarm) analysis.

pub mod graph;
pub mod waves;

pub use graph::{BlockedEntry, GraphSnapshot};
pub use waves::{Wave, WaveAnalysis, WaveIssue, analyze_waves};
