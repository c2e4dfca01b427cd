//! # Campus Knowledge Engine
//!
//! A retrieval-augmented assistant that answers college questions
//! (admissions, courses, fees, facilities, placements, events) from a
//! corpus of institutional documents, and politely refuses everything else.
//!
//! ## Architecture
//!
//! ```text
//! ingestion (offline)
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│ Vector index │
//! │ pdf/docx │   └─────────┘   └──────────┘   └──────┬───────┘
//! │ html/txt │                                       │
//! └──────────┘                                       │
//! query (per turn)                                   ▼
//! ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌─────────────┐
//! │ History │──▶│ Rewriter │──▶│ Classifier │──▶│ Retrieve│──▶│ Synthesizer │
//! └─────────┘   └──────────┘   └────────────┘   └─────────┘   └──────┬──────┘
//!      ▲                                                             │
//!      └───────────────────── append question + answer ──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cke init
//! cke ingest ./corpus
//! cke ask demo "What are the library hours?"
//! cke serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error type |
//! | [`loader`] | PDF, DOCX, HTML and text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait, SQLite and in-memory backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`llm`] | Chat model client |
//! | [`rewriter`] | Follow-up question rewriting |
//! | [`classifier`] | College-domain keyword gate |
//! | [`synthesizer`] | Grounded answer generation |
//! | [`conversation`] | Per-session chat history |
//! | [`accounts`] | Users and their sessions |
//! | [`pipeline`] | The per-turn query pipeline |
//! | [`services`] | Startup wiring |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`prompts`] | Prompt and refusal texts |
//! | [`commands`] | CLI command implementations |
//! | [`stats`] | Database statistics |
//! | [`logging`] | Tracing subscriber setup |

pub mod accounts;
pub mod chunk;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod rewriter;
pub mod server;
pub mod services;
pub mod stats;
pub mod synthesizer;

pub use error::{PipelineError, Result};
pub use pipeline::{Assistant, Outcome, Reply};
