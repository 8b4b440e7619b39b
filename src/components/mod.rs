//! # Component model.
//!
//! This module provides the component-related types:
//! - [`Component`] / [`ComponentRef`] - one managed unit and its shared handle
//! - [`Kind`] - script-driven vs code-backed execution
//! - [`Handler`] / [`HandlerRegistry`] - in-process lifecycle implementations
//! - [`parse_dependencies`] - free-text dependency declarations

mod component;
mod deps;
mod handler;

pub use component::{Component, ComponentRef, Kind};
pub use deps::{parse_dependencies, DepSyntaxError};
pub use handler::{Handler, HandlerFactory, HandlerRegistry};
