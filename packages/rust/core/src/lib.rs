//! Core domain logic and pipeline orchestration for ABM contact processing.
//!
//! This crate ties the collaborator adapters (domain lookup, CRM, text
//! generation) into one run: enrich → evaluate → sync + summarize + crew →
//! [`PipelineResult`](result::PipelineResult).

pub mod crew;
pub mod enrichment;
pub mod pipeline;
pub mod result;
pub mod summary;
pub mod targeting;
