//! # Event Assistant
//!
//! RAG chat backend for an event/venue listing platform.
//!
//! The assistant answers platform questions from an embedded knowledge
//! base, fetches live listings through model-callable tools, and keeps
//! durable multi-turn conversation state per session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │ Docs dir │──▶│  Ingest   │──▶│  SQLite   │
//! │ .txt/.md │   │Chunk+Embed│   │chunks/... │
//! └──────────┘   └───────────┘   └─────┬─────┘
//!                                      │
//!   chat turn:                         ▼
//!   history ─▶ retrieval ─▶ model ─▶ tools ─▶ model ─▶ reply
//!                │                     │
//!            ChunkStore           listing tables
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! eva init                        # create database
//! eva ingest ./docs --clear       # (re)build the knowledge base
//! eva search "refund policy"      # inspect retrieval from the terminal
//! eva serve                       # start the chat API
//! eva cleanup --days 30           # retention sweep (cron)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`provider`] | OpenAI chat/embedding clients behind trait seams |
//! | [`store`] | SQLite embedding store |
//! | [`ingest`] | Chunking and document ingestion |
//! | [`retrieval`] | Top-K search and context formatting |
//! | [`listings`] | Narrow reads over the platform's listing tables |
//! | [`tools`] | Model-callable tool registry |
//! | [`orchestrator`] | Two-round tool-calling chat turns |
//! | [`session`] | Durable session and message storage |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod ingest;
pub mod listings;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
