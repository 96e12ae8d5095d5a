//! Asynchronous decision-tree-driven extraction pipeline for regulatory
//! documents (zoning ordinances, water-rights rules) across U.S. counties.
//!
//! Grounded on the NREL `elm` Python package (`elm/ords/`): a cooperative
//! service runtime dispatches rate-limited LLM calls and file I/O
//! ([`service`]), a directed decision graph drives multi-turn structured
//! extraction ([`graph`], [`structured_parser`]), and the per-location
//! pipeline ([`pipeline`]) fans out across every county under
//! [`orchestrator`]'s bounded concurrency.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod extraction;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod ordinance;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod structured_parser;
pub mod usage;
pub mod validate;
