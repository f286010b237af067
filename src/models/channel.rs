use serde::Serialize;

use super::ServerId;

/// One parsed channel-list data line, filed under the category it appeared in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub category: String,
    pub name: String,
    pub url: String,
    pub server: ServerId,
}

/// Final emitted line: `name,url` under a category header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputRecord {
    pub category: String,
    pub name: String,
    pub url: String,
}
