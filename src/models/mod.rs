//! Domain models shared across the pipeline

pub mod blacklist;
pub mod channel;
pub mod probe;
pub mod server;

pub use blacklist::{BlacklistEntry, BlacklistReason};
pub use channel::{ChannelRecord, OutputRecord};
pub use probe::{ProbeOutcome, ProbeResult, QualifiedSet};
pub use server::ServerId;
