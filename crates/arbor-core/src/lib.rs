//! Tree walker, retry engine, and property evaluation for Arbor workflows.
//!
//! This crate owns the engine logic and the "ports" the infrastructure layer
//! implements (`StateStore`). It depends only on `arbor-types` -- never on
//! `arbor-infra` or any database crate.

pub mod action;
pub mod actions;
pub mod document;
pub mod error;
pub mod evaluator;
pub(crate) mod execution;
pub mod expression;
pub mod hint;
pub mod hooks;
pub mod retry;
pub mod services;
pub mod state;
pub mod subroutine;
pub mod walker;

pub use action::{Action, ActionContext, ActionRegistry};
pub use error::EngineError;
pub use evaluator::{EvaluationScope, ExternalExecutors, PropertyEvaluator};
pub use hint::{Evaluable, TypeHint};
pub use hooks::{BoxVisitHooks, VisitContext, VisitDirective, VisitHooks};
pub use services::EngineServices;
pub use state::{BoxStateStore, MemoryStateStore, SessionStore, StateStore};
pub use subroutine::WorkflowCatalog;
pub use walker::{SessionOptions, TreeWalker, WalkOutcome};
