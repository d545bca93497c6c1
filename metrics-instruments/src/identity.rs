//! Canonical metric identities.
//!
//! A metric is identified by its name and an unordered set of tags. Both are folded into a single
//! string so that the registry can key its storage on one comparable value:
//!
//! - without tags, the identity is the name itself: `requests`
//! - otherwise, tags are deduplicated, sorted ascending, joined with `,` and appended to the name
//!   after a `|`: `requests|host:a,path:/`
//!
//! Empty tags are discarded. Splitting happens on the *last* `|`, so names may contain `|` as
//! long as the tag segment that follows never does.
use std::{borrow::Borrow, fmt, sync::Arc};

use lockfree_object_pool::LinearObjectPool;

const NAME_SEPARATOR: char = '|';
const TAG_SEPARATOR: char = ',';

/// A canonical (name, tag set) identity.
///
/// Equal names with equal tag sets always produce equal identities, regardless of the order in
/// which tags were given or whether any of them were repeated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricId(String);

impl MetricId {
    /// Creates a new `MetricId` from a name and a set of tags.
    ///
    /// This allocates a scratch buffer for sorting the tags. Hot paths should prefer
    /// [`IdentityEncoder::encode`], which reuses pooled scratch buffers.
    pub fn new(name: &str, tags: &[&str]) -> Self {
        let mut order = Vec::with_capacity(tags.len());
        encode_into(name, tags, &mut order)
    }

    /// Gets the encoded identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits this identity back into its name and its sorted, deduplicated tags.
    pub fn split(&self) -> (&str, Vec<&str>) {
        split_metric_id(&self.0)
    }

    /// Consumes this `MetricId`, returning the encoded identity.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetricId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MetricId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Splits an encoded identity into its name and tags.
///
/// The split point is the last `|`. When there is none, when it is the first character, or when
/// nothing follows it, the whole input is returned as the name, with no tags.
pub fn split_metric_id(id: &str) -> (&str, Vec<&str>) {
    match id.rfind(NAME_SEPARATOR) {
        Some(pos) if pos > 0 && pos < id.len() - 1 => {
            (&id[..pos], id[pos + 1..].split(TAG_SEPARATOR).collect())
        }
        _ => (id, Vec::new()),
    }
}

/// Encodes identities using pooled scratch space.
///
/// Sorting tags requires a permutation buffer; the encoder keeps those buffers in an object pool
/// so that steady-state encoding only allocates the resulting identity itself.
#[derive(Clone)]
pub struct IdentityEncoder {
    scratch: Arc<LinearObjectPool<Vec<usize>>>,
}

impl IdentityEncoder {
    /// Creates a new `IdentityEncoder` with an empty scratch pool.
    pub fn new() -> Self {
        Self { scratch: Arc::new(LinearObjectPool::new(Vec::new, Vec::clear)) }
    }

    /// Encodes the given name and tags into a [`MetricId`].
    pub fn encode(&self, name: &str, tags: &[&str]) -> MetricId {
        if tags.is_empty() {
            return MetricId(name.to_owned());
        }

        let mut order = self.scratch.pull();
        encode_into(name, tags, &mut order)
    }
}

impl Default for IdentityEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityEncoder").finish_non_exhaustive()
    }
}

fn encode_into(name: &str, tags: &[&str], order: &mut Vec<usize>) -> MetricId {
    // Sort a permutation rather than the tags themselves, so the caller's slice stays untouched.
    order.clear();
    order.extend((0..tags.len()).filter(|&idx| !tags[idx].is_empty()));
    order.sort_unstable_by(|&a, &b| tags[a].cmp(tags[b]));
    order.dedup_by(|a, b| tags[*a] == tags[*b]);

    if order.is_empty() {
        return MetricId(name.to_owned());
    }

    let len = name.len() + order.iter().map(|&idx| tags[idx].len() + 1).sum::<usize>();
    let mut id = String::with_capacity(len);
    id.push_str(name);
    for (pos, &idx) in order.iter().enumerate() {
        id.push(if pos == 0 { NAME_SEPARATOR } else { TAG_SEPARATOR });
        id.push_str(tags[idx]);
    }

    MetricId(id)
}
