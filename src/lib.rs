// Chaff: feedback clustering and RICE prioritization
//
// This is the library root. Each module corresponds to a stage of the
// feedback-to-priorities workflow.

pub mod clustering;
pub mod config;
pub mod db;
pub mod feedback;
pub mod output;
pub mod pipeline;
pub mod scoring;
pub mod status;
