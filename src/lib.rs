//! Real-time voice-assistant gateway core.
//!
//! Devices hold a WebSocket open to the gateway, stream audio up and receive
//! synthesized speech, captions and control messages back. This crate owns
//! the part in between:
//!
//! - [`session`]: the live-conversation aggregate, its registry and the
//!   device request correlator
//! - [`router`]: protocol state machine and connection lifecycle
//! - [`conversation`]: windowed turn memory per (device, role, session)
//! - [`tools`]: global tool catalogue and per-session views
//! - [`playback`]: frame-paced audio delivery, spoken prompts and stories
//!
//! Persistence, speech providers, voice-activity detection and the dialogue
//! turn itself are collaborators behind the traits in [`directory`],
//! [`providers`] and [`dialogue`].

pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod playback;
pub mod protocol;
pub mod providers;
pub mod router;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use router::{GatewayServices, MessageRouter};
pub use session::{ChatSession, SessionManager};
