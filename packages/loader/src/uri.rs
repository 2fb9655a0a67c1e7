//! # URI Planner
//!
//! ## Purpose
//!
//! Turns a batch of requested definitions into the smallest set of fetch URIs
//! that each stay under the configured length budget.
//!
//! ## Layout
//!
//! ```text
//! {host}{basePath}{contextParams}&ui=button,input&force=record&_uid={token}
//! {host}{basePath}{contextParams}&_def=markup://ui:button&_uid={token}
//! ```
//!
//! Names are split into trust buckets, grouped by namespace and sorted, then
//! packed greedily. A namespace that alone exceeds the budget is split name by
//! name. The budget bounds the descriptor segments of each URI.
//!
//! The `_uid` token is a strong cache key only when every name in the URI
//! carries a version tag; otherwise it is `LATEST-{n}` with a counter that
//! never repeats. Only cacheable URIs in the unrestricted bucket go to the CDN.

use crate::config::LoaderConfig;
use crc32fast::Hasher;
use std::cell::Cell;
use std::collections::BTreeMap;
use tracing::{debug, instrument};
use trellis_common::DefDescriptor;

pub const DESCRIPTOR_PARAM: &str = "_def";
pub const UID_PARAM: &str = "_uid";
pub const UID_DEFAULT: &str = "LATEST";

const DESCRIPTOR_SEGMENT: &str = "&_def=";

/// Requested definitions and their optional version tags
pub type DefinitionRequests = BTreeMap<DefDescriptor, Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustBucket {
    /// Must be served by the primary host
    Restricted,
    /// Internal namespaces that may be served by the CDN
    Unrestricted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUri {
    pub uri: String,
    /// Descriptor segments (`&ns=a,b` or `&_def=...`)
    pub query: String,
    pub token: String,
    pub cacheable: bool,
    pub bucket: TrustBucket,
    pub descriptors: Vec<DefDescriptor>,
}

impl PlannedUri {
    /// Key the server uses to report an in-band error for this request
    pub fn error_key(&self) -> &str {
        self.query.strip_prefix(DESCRIPTOR_SEGMENT).unwrap_or(&self.query)
    }
}

#[derive(Default)]
struct Chunk {
    query: String,
    entries: Vec<(DefDescriptor, Option<String>)>,
}

impl Chunk {
    fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    fn len(&self) -> usize {
        self.query.len()
    }

    fn extend(&mut self, segment: &str, entries: &[(&DefDescriptor, &Option<String>)]) {
        self.query.push_str(segment);
        self.entries
            .extend(entries.iter().map(|(d, tag)| ((*d).clone(), (*tag).clone())));
    }
}

pub struct UriPlanner {
    config: LoaderConfig,
    counter: Cell<u64>,
}

impl UriPlanner {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            counter: Cell::new(0),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn max_length(&self) -> usize {
        self.config.uri_budget.max_length()
    }

    pub fn bucket_for(&self, namespace: &str) -> TrustBucket {
        if self.config.cdn_host.is_some() && self.config.is_internal_namespace(namespace) {
            TrustBucket::Unrestricted
        } else {
            TrustBucket::Restricted
        }
    }

    #[instrument(skip_all, fields(requests = requests.len()))]
    pub fn plan(&self, requests: &DefinitionRequests) -> Vec<PlannedUri> {
        type Namespaces<'a> = BTreeMap<&'a str, Vec<(&'a DefDescriptor, &'a Option<String>)>>;
        let mut buckets: BTreeMap<TrustBucket, Namespaces> = BTreeMap::new();
        for (descriptor, tag) in requests {
            buckets
                .entry(self.bucket_for(&descriptor.namespace))
                .or_default()
                .entry(descriptor.namespace.as_str())
                .or_default()
                .push((descriptor, tag));
        }

        let budget = self.max_length();
        let mut planned = Vec::new();
        for (bucket, namespaces) in buckets {
            for chunk in self.pack(&namespaces, budget) {
                planned.push(self.finish(bucket, chunk));
            }
        }
        debug!(uris = planned.len(), "planned definition fetches");
        planned
    }

    fn pack(
        &self,
        namespaces: &BTreeMap<&str, Vec<(&DefDescriptor, &Option<String>)>>,
        budget: usize,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        if let [(_, names)] = namespaces.iter().collect::<Vec<_>>().as_slice() {
            if let [(descriptor, tag)] = names.as_slice() {
                let mut single = Chunk::default();
                let segment = format!("{}{}", DESCRIPTOR_SEGMENT, descriptor);
                single.extend(&segment, &[(*descriptor, *tag)]);
                chunks.push(single);
                return chunks;
            }
        }

        let mut current = Chunk::default();
        for (namespace, names) in namespaces {
            let joined: Vec<&str> = names.iter().map(|(d, _)| d.name.as_str()).collect();
            let segment = format!("&{}={}", namespace, joined.join(","));

            if current.len() + segment.len() <= budget {
                current.extend(&segment, names);
                continue;
            }
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if segment.len() <= budget {
                current.extend(&segment, names);
                continue;
            }

            debug!(namespace = *namespace, names = names.len(), "namespace exceeds budget, splitting");
            for entry in names {
                let name = entry.0.name.as_str();
                if current.is_empty() {
                    current.extend(&format!("&{}={}", namespace, name), &[*entry]);
                } else if current.len() + 1 + name.len() > budget {
                    chunks.push(std::mem::take(&mut current));
                    current.extend(&format!("&{}={}", namespace, name), &[*entry]);
                } else {
                    current.extend(&format!(",{}", name), &[*entry]);
                }
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn finish(&self, bucket: TrustBucket, chunk: Chunk) -> PlannedUri {
        let tags: Vec<Option<&str>> = chunk.entries.iter().map(|(_, tag)| tag.as_deref()).collect();
        let (token, cacheable) = self.token(&tags);
        let host = match (&self.config.cdn_host, bucket, cacheable) {
            (Some(cdn), TrustBucket::Unrestricted, true) => cdn.as_str(),
            _ => self.config.host.as_str(),
        };
        let uri = format!(
            "{}{}{}&{}={}",
            host,
            self.config.query_prefix(),
            chunk.query,
            UID_PARAM,
            token
        );
        PlannedUri {
            uri,
            query: chunk.query,
            token,
            cacheable,
            bucket,
            descriptors: chunk.entries.into_iter().map(|(d, _)| d).collect(),
        }
    }

    /// Cache-validation token for one URI. Returns the token and whether it
    /// is a real cache key.
    pub fn token(&self, tags: &[Option<&str>]) -> (String, bool) {
        let uids: Option<Vec<&str>> = tags
            .iter()
            .map(|tag| (*tag).filter(|t| !t.is_empty()))
            .collect();
        match uids {
            Some(uids) if uids.len() > 1 => (hash_uids(&uids.concat()), true),
            Some(uids) if uids.len() == 1 => (uids[0].to_string(), true),
            _ => {
                let n = self.counter.get();
                self.counter.set(n + 1);
                (format!("{}-{}", UID_DEFAULT, n), false)
            }
        }
    }
}

/// Fixed-width token for a concatenation of version tags
pub fn hash_uids(joined: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(joined.as_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Recovers the requested descriptors from a fetch URI, accepting both the
/// `_def=markup://ns:name` and the grouped `ns=a,b` forms. Parameters whose
/// name starts with `_` or is not a plain identifier are skipped.
pub fn descriptors_from_uri(uri: &str) -> Vec<DefDescriptor> {
    let query = uri.split_once('?').map(|(_, q)| q).unwrap_or(uri);
    let mut descriptors = Vec::new();
    for param in query.split('&') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name == DESCRIPTOR_PARAM {
            if let Ok(descriptor) = DefDescriptor::parse(value) {
                descriptors.push(descriptor);
            }
        } else if is_namespace(name) {
            descriptors.extend(
                value
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(|n| DefDescriptor::new(name, n)),
            );
        }
    }
    descriptors
}

fn is_namespace(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
