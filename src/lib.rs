//! # Index Bot
//!
//! A conversational front end over a persisted document index.
//!
//! The bot answers questions by retrieving and synthesizing previously
//! ingested content, accepts new documents, reports its settings, and records
//! user feedback. The index is chosen at startup from configuration, loaded
//! from disk (or created empty), and written back when the bot shuts down.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │  config  │──▶│ resolver │──▶│   store    │──▶│   handler    │
//! │ TOML+env │   │ backend  │   │ load/create│   │ query/ingest │
//! └──────────┘   └──────────┘   └────────────┘   └──────┬───────┘
//!                                                       │
//!                                   ┌───────────────────┤
//!                                   ▼                   ▼
//!                              ┌──────────┐       ┌──────────┐
//!                              │   CLI    │       │   HTTP   │
//!                              │  (ibot)  │       │  (SSE)   │
//!                              └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ibot ingest ./docs                # chunk files into the index, persist it
//! ibot query "what about cats?"     # answer once from the persisted index
//! ibot serve                        # run the HTTP protocol adapter
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Protocol and index data types |
//! | [`chunk`] | Document to node chunking |
//! | [`backend`] | Index trait, local backends, backend registry |
//! | [`resolver`] | Backend selection from configuration |
//! | [`store`] | Loading and persisting the index |
//! | [`handler`] | Conversation lifecycle and protocol operations |
//! | [`server`] | HTTP adapter |
//! | [`ingest`] | Filesystem scan for bulk ingestion |
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Typed errors |

pub mod backend;
pub mod chunk;
pub mod config;
pub mod error;
pub mod handler;
pub mod ingest;
pub mod models;
pub mod resolver;
pub mod server;
pub mod store;
