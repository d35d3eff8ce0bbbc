//! Control core of the plansmith account planning assistant.
//!
//! The document model and merge engine hold the plan, the contract parser
//! reads model output, and the research state machine decides how each
//! chat turn proceeds. [`turn::TurnCoordinator`] ties them together over
//! the collaborator traits in [`service`].

pub mod contract;
pub mod document;
pub mod merge;
pub mod message;
pub mod progress;
pub mod research;
pub mod service;
pub mod session;
pub mod turn;
