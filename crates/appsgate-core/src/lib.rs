/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Apps proxy engine.
//!
//! Turns chat-server context into per-app redacted views, fans calls out to
//! installed apps (HTTP, AWS Lambda, in-process builtins), merges the UI
//! bindings they contribute, and delivers subscribed lifecycle events.
//!
//! The [`Proxy`] value owns every store and upstream; the HTTP front holds it
//! in an `Arc` and calls its operations directly.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod authz;
pub mod bindings;
pub mod builtin;
pub mod context;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod expand;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod proxy;
pub mod services;
pub mod store;
pub mod upstream;
pub mod values;

#[cfg(test)]
pub(crate) mod testutil;

pub use authz::{authorize, Caller, Capability, IdentityClass};
pub use bindings::aggregate::BindingsOutcome;
pub use error::{MultiError, ProxyError};
pub use expand::{Expand, ExpandLevel, Level};
pub use model::*;
pub use notify::{ChatEvent, NotifyReport};
pub use proxy::{Proxy, ProxyDeps};
