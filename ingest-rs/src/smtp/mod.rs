//! SMTP ingress (RFC 5321)
//!
//! - [`server`]: TCP listener, one task per connection
//! - [`session`]: per-connection state machine
//! - [`commands`]: command line parsing
//! - [`reply`]: reply rendering and the rejection code table

pub mod commands;
pub mod reply;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use reply::Reply;
pub use server::SmtpServer;
pub use session::SmtpSession;
