//! Endpoint registry
//!
//! Groups parsed channel lines by category, then by server, preserving the
//! order in which categories, servers and channels first appear. Built once
//! per run from the raw channel-list lines and read-only afterwards.

use std::collections::{HashMap, HashSet};

use crate::config::defaults::DEFAULT_CATEGORY;
use crate::models::{ChannelRecord, ServerId};
use crate::utils::url::StreamUrl;

/// Text that marks a category line, e.g. `央视频道,#genre#`
pub const CATEGORY_MARKER: &str = "#genre#";

/// Classification of one raw channel-list line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Category(String),
    Channel {
        name: String,
        url: String,
        server: ServerId,
    },
    /// Blank, comment, malformed or unsupported
    Ignored,
}

/// Parse a single channel-list line
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Ignored;
    }

    if line.contains(CATEGORY_MARKER) {
        let name = line.split(',').next().unwrap_or_default().trim();
        return if name.is_empty() || name.contains(CATEGORY_MARKER) {
            ParsedLine::Ignored
        } else {
            ParsedLine::Category(name.to_string())
        };
    }

    let Some((name, url)) = line.split_once(',') else {
        return ParsedLine::Ignored;
    };
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty() || url.is_empty() {
        return ParsedLine::Ignored;
    }

    match StreamUrl::parse(url) {
        Ok(parsed) => ParsedLine::Channel {
            name: name.to_string(),
            url: url.to_string(),
            server: parsed.server_id(),
        },
        Err(_) => ParsedLine::Ignored,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
}

/// The channels one server carries within one category
#[derive(Debug, Clone)]
pub struct ServerChannels {
    pub server: ServerId,
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone)]
pub struct CategoryGroup {
    pub name: String,
    servers: Vec<ServerChannels>,
    server_index: HashMap<ServerId, usize>,
}

impl CategoryGroup {
    fn new(name: String) -> Self {
        Self {
            name,
            servers: Vec::new(),
            server_index: HashMap::new(),
        }
    }

    /// Servers in first-seen order
    pub fn servers(&self) -> &[ServerChannels] {
        &self.servers
    }

    fn push(&mut self, server: ServerId, entry: ChannelEntry) {
        let idx = match self.server_index.get(&server) {
            Some(idx) => *idx,
            None => {
                self.servers.push(ServerChannels {
                    server: server.clone(),
                    channels: Vec::new(),
                });
                self.server_index.insert(server, self.servers.len() - 1);
                self.servers.len() - 1
            }
        };
        self.servers[idx].channels.push(entry);
    }
}

/// A server to probe and every URL it was seen serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCandidate {
    pub server: ServerId,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<ServerCandidate>,
    /// Distinct servers left out because they were already blacklisted
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    categories: Vec<CategoryGroup>,
    category_index: HashMap<String, usize>,
    channel_count: usize,
    ignored_lines: usize,
}

impl EndpointRegistry {
    /// Build from raw lines, filing channels before any marker under `未分类`
    pub fn build<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build_with_default(DEFAULT_CATEGORY, lines)
    }

    pub fn build_with_default<I, S>(default_category: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        let mut current_category = default_category.to_string();

        for line in lines {
            match parse_line(line.as_ref()) {
                ParsedLine::Category(name) => current_category = name,
                ParsedLine::Channel { name, url, server } => registry.insert(ChannelRecord {
                    category: current_category.clone(),
                    name,
                    url,
                    server,
                }),
                ParsedLine::Ignored => {
                    if !line.as_ref().trim().is_empty() {
                        registry.ignored_lines += 1;
                    }
                }
            }
        }

        registry
    }

    fn insert(&mut self, record: ChannelRecord) {
        let idx = match self.category_index.get(&record.category) {
            Some(idx) => *idx,
            None => {
                self.categories
                    .push(CategoryGroup::new(record.category.clone()));
                self.category_index
                    .insert(record.category.clone(), self.categories.len() - 1);
                self.categories.len() - 1
            }
        };

        self.categories[idx].push(
            record.server,
            ChannelEntry {
                name: record.name,
                url: record.url,
            },
        );
        self.channel_count += 1;
    }

    /// Categories in declaration order
    pub fn categories(&self) -> &[CategoryGroup] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Non-blank lines that were neither a marker nor a usable channel
    pub fn ignored_lines(&self) -> usize {
        self.ignored_lines
    }

    /// Number of distinct servers across all categories
    pub fn server_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| c.servers.iter().map(|s| &s.server))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct servers to probe, each with the union of its URLs
    ///
    /// Servers in `skip` are left out and counted. Order is first appearance
    /// across categories, and URLs keep their first-seen order.
    pub fn probe_candidates(&self, skip: &HashSet<ServerId>) -> CandidateSet {
        let mut candidates: Vec<ServerCandidate> = Vec::new();
        let mut positions: HashMap<&ServerId, usize> = HashMap::new();
        let mut seen_urls: HashSet<(&ServerId, &str)> = HashSet::new();
        let mut skipped: HashSet<&ServerId> = HashSet::new();

        for category in &self.categories {
            for group in &category.servers {
                if skip.contains(&group.server) {
                    skipped.insert(&group.server);
                    continue;
                }

                let idx = *positions.entry(&group.server).or_insert_with(|| {
                    candidates.push(ServerCandidate {
                        server: group.server.clone(),
                        urls: Vec::new(),
                    });
                    candidates.len() - 1
                });

                for channel in &group.channels {
                    if seen_urls.insert((&group.server, channel.url.as_str())) {
                        candidates[idx].urls.push(channel.url.clone());
                    }
                }
            }
        }

        CandidateSet {
            candidates,
            skipped: skipped.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(s: &str) -> ServerId {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_line_kinds() {
        assert_eq!(
            parse_line("央视频道,#genre#"),
            ParsedLine::Category("央视频道".into())
        );
        assert_eq!(
            parse_line(" CCTV1 , http://10.0.0.1:80/rtp/239.3.1.1:8000 "),
            ParsedLine::Channel {
                name: "CCTV1".into(),
                url: "http://10.0.0.1:80/rtp/239.3.1.1:8000".into(),
                server: server("10.0.0.1:80"),
            }
        );
        assert_eq!(parse_line(""), ParsedLine::Ignored);
        assert_eq!(parse_line("no comma here"), ParsedLine::Ignored);
        assert_eq!(parse_line("CCTV1,http://10.0.0.1/a"), ParsedLine::Ignored);
        assert_eq!(parse_line("CCTV1,rtp://239.3.1.1:8000"), ParsedLine::Ignored);
        assert_eq!(parse_line(",http://10.0.0.1:80/a"), ParsedLine::Ignored);
        assert_eq!(parse_line(",#genre#"), ParsedLine::Ignored);
    }

    #[test]
    fn test_build_groups_by_category_then_server() {
        let registry = EndpointRegistry::build([
            "CCTV1,http://10.0.0.9:80/x",
            "央视频道,#genre#",
            "CCTV1,http://10.0.0.1:80/a",
            "CCTV2,http://10.0.0.2:80/b",
            "CCTV3,http://10.0.0.1:80/c",
            "garbage line",
            "",
            "卫视频道,#genre#",
            "湖南卫视,http://10.0.0.2:80/d",
        ]);

        let names: Vec<_> = registry.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["未分类", "央视频道", "卫视频道"]);

        let cctv = &registry.categories()[1];
        assert_eq!(cctv.servers().len(), 2);
        assert_eq!(cctv.servers()[0].server, server("10.0.0.1:80"));
        assert_eq!(
            cctv.servers()[0]
                .channels
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>(),
            vec!["CCTV1", "CCTV3"]
        );

        assert_eq!(registry.channel_count(), 5);
        assert_eq!(registry.server_count(), 3);
        assert_eq!(registry.ignored_lines(), 1);
    }

    #[test]
    fn test_repeated_category_extends_original_position() {
        let registry = EndpointRegistry::build([
            "A,#genre#",
            "a1,http://10.0.0.1:80/1",
            "B,#genre#",
            "b1,http://10.0.0.2:80/1",
            "A,#genre#",
            "a2,http://10.0.0.1:80/2",
        ]);
        let names: Vec<_> = registry.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(registry.categories()[0].servers()[0].channels.len(), 2);
    }

    #[test]
    fn test_unparseable_input_gives_empty_registry() {
        let registry = EndpointRegistry::build(["#EXTM3U", "x,y", "更新时间,#genre#"]);
        assert!(registry.is_empty());
        assert_eq!(registry.server_count(), 0);
    }

    #[test]
    fn test_probe_candidates_are_distinct_servers() {
        let registry = EndpointRegistry::build([
            "A,#genre#",
            "ch1,http://10.0.0.1:80/a",
            "ch2,http://10.0.0.2:80/b",
            "B,#genre#",
            "ch1,http://10.0.0.1:80/a",
            "ch3,http://10.0.0.1:80/c",
        ]);

        let set = registry.probe_candidates(&HashSet::new());
        assert_eq!(set.skipped, 0);
        assert_eq!(set.candidates.len(), 2);
        assert_eq!(set.candidates[0].server, server("10.0.0.1:80"));
        assert_eq!(
            set.candidates[0].urls,
            vec!["http://10.0.0.1:80/a", "http://10.0.0.1:80/c"]
        );
    }

    #[test]
    fn test_probe_candidates_skip_blacklisted() {
        let registry = EndpointRegistry::build([
            "A,#genre#",
            "ch1,http://10.0.0.1:80/a",
            "B,#genre#",
            "ch1,http://10.0.0.1:80/a",
            "ch2,http://10.0.0.2:80/b",
        ]);

        let skip: HashSet<_> = [server("10.0.0.1:80")].into_iter().collect();
        let set = registry.probe_candidates(&skip);
        assert_eq!(set.skipped, 1);
        assert_eq!(set.candidates.len(), 1);
        assert_eq!(set.candidates[0].server, server("10.0.0.2:80"));
    }
}
