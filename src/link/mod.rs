//! Peer link controller and its roles.
//!
//! # Roles
//!
//! | Role | Runs while | Ends by |
//! |------|------------|---------|
//! | Listener | `Listening` | accepting, or its endpoint closing |
//! | Initiator | `Connecting` | connecting, or its socket closing |
//! | Session | `Connected` | peer EOF, read error, or its connection closing |
//!
//! At most one role is installed at a time. Each role is a Tokio task that
//! reports back to the controller tagged with its [`RoleId`](crate::RoleId);
//! reports from roles the controller already replaced are dropped.

// ============================================================================
// Submodules
// ============================================================================

mod controller;
mod initiator;
mod listener;
mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use controller::{ActiveRoles, LinkController, WriteOutcome};
