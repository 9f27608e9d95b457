//! Declarative backend stack.
//!
//! A stack is declared through a [`StackBuilder`] and closed with
//! [`StackBuilder::finalize`], which yields an immutable [`StackGraph`].
//!
//! ```text
//! table ─┐
//!        ├─ function ─ grant ──────────────┐
//! user pool ─ client ─ identity pool ─ roles ─ attachment
//!        └─ authorizer ─ method (GET /scan) ┘
//! ```
//!
//! Binders live in [`federation`], [`endpoint`] and [`grant`]; the reference
//! backend is declared in [`blueprint`].

pub mod blueprint;
pub mod builder;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod federation;
pub mod grant;
pub mod graph;
pub mod handle;
pub mod naming;
pub mod resources;

pub use builder::{ClientProps, EnvValue, FunctionProps, StackBuilder, TableProps, UserPoolProps};
pub use config::StackConfig;
pub use error::{Result, StackError};
pub use graph::StackGraph;
pub use handle::ResourceRef;
