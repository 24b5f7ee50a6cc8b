//! # Survey Index
//!
//! Turns a wide table of coded survey answers into one nested document per
//! respondent, embeds every answer as a short natural-language statement, and
//! indexes the documents into Elasticsearch for combined keyword and
//! nearest-neighbor search.
//!
//! ## Architecture
//!
//! ```text
//! schema file ──▶ metadata ──┐
//!                            ▼
//! response table ──▶ responses ──▶ normalize ──▶ statement ──▶ embedding
//!                                                                 │
//!                                        store ◀── index ◀── assemble
//!                                          ▲
//!                  CLI (svidx) / server ──▶ jobs ──▶ pipeline
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`metadata`] | Question schema parsing |
//! | [`responses`] | Response table loading |
//! | [`normalize`] | Answer-code resolution |
//! | [`statement`] | Embedding text rendering |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`assemble`] | Per-user document assembly |
//! | [`store`] | Search-store abstraction (Elasticsearch, in-memory) |
//! | [`index`] | Index mapping and bulk writes |
//! | [`pipeline`] | Indexing run orchestration |
//! | [`progress`] | Progress reporting |
//! | [`jobs`] | Background indexing jobs |
//! | [`search`] | Nearest-neighbor search |
//! | [`server`] | HTTP server |
//! | [`error`] | Run-boundary errors |

pub mod assemble;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod jobs;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod responses;
pub mod search;
pub mod server;
pub mod statement;
pub mod store;
