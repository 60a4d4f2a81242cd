//! Hash-based issue IDs.
//!
//! IDs have the form `<prefix>-<hash>[.<n>]*` where the hash is base36
//! lowercase derived from SHA256 over the creation tuple. Identical
//! independent creations in different clones produce identical IDs, which is
//! what lets them converge without central coordination; distinct creations
//! collide with probability < 1/36^length.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{BeadsError, Result};

/// Shortest hash segment.
pub const MIN_HASH_LENGTH: usize = 3;
/// Longest hash segment; generation fails hard beyond this.
pub const MAX_HASH_LENGTH: usize = 8;
/// Nonces tried per length before the length grows.
pub const NONCES_PER_LENGTH: u32 = 10;
/// Default cap on child nesting (`hierarchy.max-depth`).
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// ID generation configuration.
#[derive(Debug, Clone)]
pub struct IdConfig {
    /// Issue ID prefix (2-16 URL-safe characters, e.g. "bd").
    pub prefix: String,
    /// Maximum collision probability before the starting length grows.
    pub max_collision_prob: f64,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            prefix: "bd".to_string(),
            max_collision_prob: 0.25,
        }
    }
}

impl IdConfig {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// Generator that produces collision-checked issue IDs.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdConfig,
}

impl IdGenerator {
    #[must_use]
    pub const fn new(config: IdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(IdConfig::with_prefix(prefix))
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Starting hash length for a database of `issue_count` issues.
    ///
    /// Birthday approximation: P(collision) over base36^len must stay under
    /// the configured bound.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn starting_length(&self, issue_count: usize) -> usize {
        let n = issue_count as f64;
        for len in MIN_HASH_LENGTH..=MAX_HASH_LENGTH {
            let space = 36_f64.powi(len as i32);
            let prob = 1.0 - (-n * n / (2.0 * space)).exp();
            if prob < self.config.max_collision_prob {
                return len;
            }
        }
        MAX_HASH_LENGTH
    }

    /// Candidate ID for a given nonce and length, without collision checking.
    #[must_use]
    pub fn candidate(
        &self,
        title: &str,
        description: Option<&str>,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        nonce: u32,
        hash_length: usize,
    ) -> String {
        let seed = id_seed(title, description, creator, created_at, nonce);
        format!("{}-{}", self.config.prefix, id_hash(&seed, hash_length))
    }

    /// Generate an ID, probing the store for collisions via `exists`.
    ///
    /// The collision ladder holds the length and walks nonces 0..10; if all
    /// collide the length grows by one and the nonce resets, up to length 8.
    ///
    /// # Errors
    ///
    /// Returns `IdSpaceExhausted` when every candidate through
    /// length 8 x nonce 10 collides.
    pub fn generate<F>(
        &self,
        title: &str,
        description: Option<&str>,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        issue_count: usize,
        exists: F,
    ) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        self.generate_from_length(
            title,
            description,
            creator,
            created_at,
            self.starting_length(issue_count),
            exists,
        )
    }

    /// Like [`IdGenerator::generate`] but starting at an explicit length.
    ///
    /// Used for import remaps, which regenerate at the colliding ID's length.
    ///
    /// # Errors
    ///
    /// Returns `IdSpaceExhausted` when every candidate collides.
    pub fn generate_from_length<F>(
        &self,
        title: &str,
        description: Option<&str>,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        start_length: usize,
        exists: F,
    ) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let start = start_length.clamp(MIN_HASH_LENGTH, MAX_HASH_LENGTH);
        for length in start..=MAX_HASH_LENGTH {
            for nonce in 0..NONCES_PER_LENGTH {
                let id = self.candidate(title, description, creator, created_at, nonce, length);
                if !exists(&id) {
                    return Ok(id);
                }
            }
        }
        Err(BeadsError::IdSpaceExhausted {
            title: title.to_string(),
        })
    }
}

/// Seed string hashed into an ID: `title|description|creator|created_ns|nonce`.
#[must_use]
pub fn id_seed(
    title: &str,
    description: Option<&str>,
    creator: Option<&str>,
    created_at: DateTime<Utc>,
    nonce: u32,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        title,
        description.unwrap_or(""),
        creator.unwrap_or(""),
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    )
}

/// SHA256 the input, take the first 8 bytes as a u64, base36-encode and
/// truncate to `length`.
#[must_use]
pub fn id_hash(input: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    let mut num = 0u64;
    for &byte in digest.iter().take(8) {
        num = (num << 8) | u64::from(byte);
    }

    let mut encoded = base36_encode(num);
    if encoded.len() < length {
        encoded = format!("{encoded:0>length$}");
    }
    encoded.chars().take(length).collect()
}

fn base36_encode(mut num: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

// ============================================================================
// Parsing and legality
// ============================================================================

/// Parsed components of an issue ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// The prefix (e.g. "bd").
    pub prefix: String,
    /// The hash portion (e.g. "7xq3").
    pub hash: String,
    /// Child path segments (`[2, 1]` for `.2.1`).
    pub child_path: Vec<u32>,
}

impl ParsedId {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.child_path.is_empty()
    }

    /// Depth in the hierarchy, 0 for roots.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.child_path.len()
    }

    /// Parent ID, `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<String> {
        if self.child_path.is_empty() {
            return None;
        }
        let mut path = self.child_path.clone();
        path.pop();
        let mut id = format!("{}-{}", self.prefix, self.hash);
        for seg in path {
            id.push('.');
            id.push_str(&seg.to_string());
        }
        Some(id)
    }

    #[must_use]
    pub fn to_id_string(&self) -> String {
        let mut id = format!("{}-{}", self.prefix, self.hash);
        for seg in &self.child_path {
            id.push('.');
            id.push_str(&seg.to_string());
        }
        id
    }
}

/// Parse and validate an issue ID.
///
/// Legality: prefix 2-16 URL-safe characters; hash 3-8 base36 characters;
/// child segments are decimal indices >= 1; no consecutive, leading or
/// trailing dots; no characters outside alphanumerics and `-_.`.
///
/// # Errors
///
/// Returns `InvalidId` when the format is illegal.
pub fn parse_id(id: &str) -> Result<ParsedId> {
    let invalid = || BeadsError::InvalidId { id: id.to_string() };

    if id.starts_with('.') || id.ends_with('.') || id.contains("..") {
        return Err(invalid());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid());
    }

    let dash = id.find('-').ok_or_else(invalid)?;
    let prefix = &id[..dash];
    let rest = &id[dash + 1..];
    if prefix.len() < 2 || prefix.len() > 16 || prefix.contains('.') {
        return Err(invalid());
    }

    let mut parts = rest.split('.');
    let hash = parts.next().ok_or_else(invalid)?;
    if hash.len() < MIN_HASH_LENGTH
        || hash.len() > MAX_HASH_LENGTH
        || !hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let mut child_path = Vec::new();
    for part in parts {
        let n: u32 = part.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }
        child_path.push(n);
    }

    Ok(ParsedId {
        prefix: prefix.to_string(),
        hash: hash.to_string(),
        child_path,
    })
}

/// Check if a string is a legal issue ID.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    parse_id(id).is_ok()
}

/// Build the child ID `<parent>.<k>`.
#[must_use]
pub fn child_id(parent_id: &str, k: u32) -> String {
    format!("{parent_id}.{k}")
}

/// Next child index under `parent_id`, reconstructed from existing IDs.
///
/// k = 1 + max existing direct child index. Counters are never stored; any
/// set of loaded issues yields the same answer.
#[must_use]
pub fn next_child_index<'a, I>(parent_id: &str, existing_ids: I) -> u32
where
    I: IntoIterator<Item = &'a str>,
{
    let mut max = 0u32;
    let prefix = format!("{parent_id}.");
    for id in existing_ids {
        let Some(rest) = id.strip_prefix(&prefix) else {
            continue;
        };
        // Direct children only: the remainder must be a bare index.
        if let Ok(n) = rest.parse::<u32>() {
            max = max.max(n);
        }
    }
    max + 1
}

/// Ensure a child of `parent_id` would not exceed `max_depth`.
///
/// # Errors
///
/// Returns `MaxDepthExceeded` when the child would sit deeper than allowed,
/// or `InvalidId` when the parent does not parse.
pub fn check_child_depth(parent_id: &str, max_depth: usize) -> Result<()> {
    let parsed = parse_id(parent_id)?;
    if parsed.depth() + 1 > max_depth {
        return Err(BeadsError::MaxDepthExceeded {
            id: parent_id.to_string(),
            max: max_depth,
        });
    }
    Ok(())
}

/// Normalize an ID to consistent lowercase form.
#[must_use]
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}

/// All IDs whose hash portion contains `hash_substring` (for partial lookup).
#[must_use]
pub fn find_matching_ids(all_ids: &[String], hash_substring: &str) -> Vec<String> {
    all_ids
        .iter()
        .filter(|id| {
            id.find('-').is_some_and(|pos| {
                let hash_part = &id[pos + 1..];
                let base = hash_part.split('.').next().unwrap_or(hash_part);
                base.contains(hash_substring)
            })
        })
        .cloned()
        .collect()
}

/// Resolve user input to a full ID: exact match, then prefix-normalized,
/// then unique hash substring.
///
/// # Errors
///
/// `IssueNotFound` when nothing matches, `AmbiguousId` when several do.
pub fn resolve_id<F, G>(input: &str, default_prefix: &str, exists: F, substring: G) -> Result<String>
where
    F: Fn(&str) -> bool,
    G: Fn(&str) -> Vec<String>,
{
    let input = input.trim();
    if input.is_empty() {
        return Err(BeadsError::InvalidId { id: String::new() });
    }
    let normalized = normalize_id(input);

    if exists(&normalized) {
        return Ok(normalized);
    }

    if !normalized.contains('-') {
        let with_prefix = format!("{default_prefix}-{normalized}");
        if exists(&with_prefix) {
            return Ok(with_prefix);
        }
    }

    let pattern = normalized
        .find('-')
        .map_or(normalized.as_str(), |pos| &normalized[pos + 1..]);
    if !pattern.is_empty() {
        let mut matches = substring(pattern);
        match matches.len() {
            0 => {}
            1 => return Ok(matches.remove(0)),
            _ => {
                return Err(BeadsError::AmbiguousId {
                    partial: input.to_string(),
                    matches,
                });
            }
        }
    }

    Err(BeadsError::IssueNotFound {
        id: input.to_string(),
    })
}
