//! Readers for the external resources the pipeline consumes

pub mod channel_list;

pub use channel_list::{ChannelListLines, read_channel_lists};
