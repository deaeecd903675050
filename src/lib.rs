//! # docqa
//!
//! Document-grounded question answering.
//!
//! An admin uploads documents; their text is extracted, truncated to a
//! fixed character budget and persisted as a single knowledge text. Users
//! then ask questions, each answered by one chat-completion request that
//! carries the whole knowledge text and instructs the model to answer from
//! it alone.
//!
//! ## Architecture
//!
//! ```text
//!  documents ──▶ ┌───────────┐    ┌────────────────┐
//!   (admin)      │ extract   │──▶ │ KnowledgeStore │──▶ file / SQLite
//!                └───────────┘    └───────┬────────┘
//!                                         │ snapshot
//!  question ───▶ AdminGate ──▶ ┌──────────▼──────┐    ┌─────────────────┐
//!                              │  AnswerEngine   │──▶ │ completion HTTP │
//!                              └──────────┬──────┘    └─────────────────┘
//!                                         ▼
//!                               Answer / QaError ──▶ ConversationLog
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Document text extraction |
//! | [`store`] | Knowledge persistence and ingestion |
//! | [`admin`] | Shared-secret gate and admin sessions |
//! | [`completion`] | Chat-completion client |
//! | [`answer`] | Prompt construction and response classification |
//! | [`conversation`] | Question/answer log |
//! | [`app`] | Component wiring |
//! | [`chat`] | Terminal shell |
//! | [`server`] | HTTP API |

pub mod admin;
pub mod answer;
pub mod app;
pub mod chat;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod extract;
pub mod models;
pub mod server;
pub mod store;
