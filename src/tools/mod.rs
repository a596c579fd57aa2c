//! Tool system: capabilities the language model may invoke.
//!
//! - [`Tool`] trait every capability implements
//! - [`ToolGlobalRegistry`] process-wide catalogue, built at startup
//! - [`ToolSessionView`] the per-session subset the model actually sees
//! - [`builtin`] role switching, music, stories, session exit

pub mod builtin;
pub mod registry;
pub mod session_view;
pub mod types;

pub use registry::ToolGlobalRegistry;
pub use session_view::ToolSessionView;
pub use types::{Tool, ToolResult};
