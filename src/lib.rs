//! # Table Talk
//!
//! Ask questions about a BigQuery dataset in plain language.
//!
//! Table Talk resolves Google Cloud and Gemini credentials from layered
//! sources, seeds a Chroma collection with schema DDL, documentation, and
//! example question/SQL pairs, then answers questions through a
//! retrieval-grounded pipeline: generate SQL with Gemini, validate it as
//! read-only, execute it on BigQuery, and enrich the result with an
//! optional chart, a summary, and follow-up questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Credentials │──▶│ Orchestrator │──▶│ BigQuery  │
//! │ dir/file/env│   │  6-stage     │   │ jobs.query│
//! └─────────────┘   │  pipeline    │   └───────────┘
//!                   └──┬───────┬───┘
//!                      │       │
//!                      ▼       ▼
//!               ┌──────────┐ ┌──────────┐
//!               │  Chroma  │ │  Gemini  │
//!               │ corpus   │ │ LLM+embed│
//!               └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ttq check                         # verify credentials resolve
//! ttq seed                          # bootstrap the retrieval corpus
//! ttq ask "How many active allocations do we have today?"
//! ttq training-data                 # list the stored corpus
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | Layered credential resolution |
//! | [`models`] | Core data types |
//! | [`corpus`] | Idempotent corpus bootstrap |
//! | [`knowledge`] | Chroma-backed retrieval and SQL generation |
//! | [`model`] | Gemini API client |
//! | [`chroma`] | Chroma REST client |
//! | [`gcp_auth`] | Service-account OAuth2 tokens |
//! | [`warehouse`] | BigQuery execution |
//! | [`chart`] | Sandboxed chart generation |
//! | [`orchestrator`] | The question-answering pipeline |
//! | [`render`] | Terminal table rendering |
//! | [`error`] | Error types |

pub mod chart;
pub mod chroma;
pub mod config;
pub mod corpus;
pub mod credentials;
pub mod error;
pub mod gcp_auth;
pub mod knowledge;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod render;
pub mod warehouse;
