//! Session-scoped access to the connection manager.
//!
//! A [`RealtimeProvider`] is created once at startup and hands out one
//! [`SessionContext`] (and therefore one manager) per user session. UI
//! components take what they need from the context through hooks whose
//! subscriptions are released when the hook is dropped.

pub mod hooks;
pub mod provider;

pub use hooks::{ConnectionStatusHook, EventHook, StateHook};
pub use provider::{RealtimeProvider, SessionContext};
