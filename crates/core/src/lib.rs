//! Deployment dispatch pipeline: audit log, branch filtering, script
//! resolution and remote execution over ssh.

pub mod audit;
pub mod cmd;
pub mod dispatch;
mod errors;
pub mod filter;
pub mod scripts;

pub use crate::audit::{AuditLog, AuditLogEntry, AuditSink, AuditStatus, MAX_ENTRIES};
pub use crate::cmd::{ExecutionOutcome, Invocation, RemoteExecutor, RemoteTarget, SshExecutor};
pub use crate::dispatch::{Dispatched, Dispatcher, ManualTrigger, WebhookRequest};
pub use crate::errors::DispatchError;
pub use crate::filter::BranchFilter;
