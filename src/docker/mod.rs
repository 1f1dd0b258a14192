mod client;

pub use client::{RuntimeClient, RuntimeError, SandboxSpec, SandboxSummary};

/// Labels attached to every sandbox container; the reconciler uses them to
/// cross-check the runtime against the registry.
pub const LABEL_SUBDOMAIN: &str = "training.subdomain";
pub const LABEL_SUBJECT: &str = "training.subject";
pub const LABEL_EXERCISE: &str = "training.exercise";

/// Port every exercise image must listen on.
pub const SANDBOX_PORT: &str = "8080/tcp";
