#![allow(clippy::doc_markdown)] // Allow technical terms like PMode, ebMS, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # AS4 Core
//!
//! Messaging core of an AS4 (ebMS3) message service handler.
//!
//! ## Overview
//!
//! Agents pick up messages from a receiver, transform them into a
//! [`models::MessagingContext`] and run them through a configured step
//! pipeline. A step that signals failure switches the agent to its error
//! pipeline; a step that returns an error is routed to the agent's exception
//! handler, which is always wrapped so that handling itself never fails.
//!
//! ## Module Organization
//!
//! - [`pipeline`] - Step abstraction, registry, executor and built-in steps
//! - [`matching`] - Scoring of receiving PModes against user messages
//! - [`exceptions`] - Exception handlers and the safe decorator
//! - [`state_machine`] - Reception awareness reliability transitions
//! - [`receivers`] - Polling template, interval backoff and receivers
//! - [`services`] - Reception awareness retry engine
//! - [`agent`] - Receiver, transformer, executor and handler wiring
//! - [`bootstrap`] - Builds and runs the configured agents
//! - [`persistence`] - Message and reception awareness repositories
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use as4_core::bootstrap::{As4Runtime, Collaborators};
//! use as4_core::config::ConfigManager;
//! use as4_core::pmode::FilePModeStore;
//! # use as4_core::transport::MessageSender;
//! # use std::sync::Arc;
//!
//! # async fn example(sender: Arc<dyn MessageSender>) -> Result<(), Box<dyn std::error::Error>> {
//! as4_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let pmodes = Arc::new(FilePModeStore::load(manager.pmode_directory())?);
//!
//! let mut runtime = As4Runtime::build(manager.config(), Collaborators::in_memory(pmodes, sender))?;
//! runtime.start()?;
//! // ...
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod exceptions;
pub mod ids;
pub mod logging;
pub mod matching;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod pmode;
pub mod receivers;
pub mod security;
pub mod services;
pub mod state_machine;
pub mod transformers;
pub mod transport;
pub mod utils;

pub use agent::Agent;
pub use bootstrap::{As4Runtime, Collaborators};
pub use config::{As4Config, ConfigManager};
pub use error::{As4Error, Result};
pub use exceptions::{ExceptionHandler, SafeExceptionHandler};
pub use matching::PModeMatcher;
pub use models::{As4Message, MessagingContext, ReceivedMessage};
pub use pipeline::{Step, StepExecutor, StepRegistry, StepResult};
pub use services::ReceptionAwarenessAgent;
