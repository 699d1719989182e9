//! A11y Sandbox
//!
//! Hidden page contexts and audit-engine injection:
//!
//! - [`OffscreenContainer`]: the shared host, attached lazily, torn down explicitly
//! - [`SandboxSession`]: one context per scan request, with a validated lifecycle
//! - [`AuditInjector`]: load, inject, wait, run and classify into an [`a11y_core::AuditOutcome`]
//! - [`SandboxBackend`]: the seam to the browser; [`WebDriverBackend`] is the real one
//!
//! # Example
//!
//! ```rust,ignore
//! use a11y_sandbox::prelude::*;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(WebDriverBackend::new(WebDriverConfig::default())?);
//! let container = OffscreenContainer::new(backend);
//! let injector = AuditInjector::default();
//!
//! let outcome = injector
//!     .audit(&container, &request, &resolve(WcagLevel::AA), &CancellationToken::new())
//!     .await?;
//! container.teardown().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod backend;
pub mod container;
pub mod error;
pub mod injector;
pub mod session;
pub mod webdriver;

// Re-exports
pub use backend::{ContextId, EngineInvocation, RunOnly, SandboxBackend};
pub use container::{ContainerStats, OffscreenContainer};
pub use error::SandboxError;
pub use injector::{classify_failure, AuditInjector, InjectorSettings, DEFAULT_ENGINE_SCRIPT_URL};
pub use session::{allowed_transitions, validate_transition, SandboxSession, SessionState};
pub use tokio_util::sync::CancellationToken;
pub use webdriver::{WebDriverBackend, WebDriverConfig};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running sandboxed audits
    pub use crate::{
        AuditInjector, CancellationToken, InjectorSettings, OffscreenContainer, SandboxBackend,
        SandboxError, SandboxSession, WebDriverBackend, WebDriverConfig,
    };
    pub use a11y_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
