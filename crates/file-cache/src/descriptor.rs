//! Download descriptors: what to fetch and how to key it

use crate::error::DescriptorError;
use md5::{Digest, Md5};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Selects which [`Fetcher`](crate::Fetcher) handles a descriptor.
///
/// Tags are open-ended: any backend can be registered under a new tag
/// without touching the cache itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTag(Cow<'static, str>);

impl BackendTag {
    /// Default object-storage backend (S3 and S3-compatible stores)
    pub const OBJECT_STORE: BackendTag = BackendTag(Cow::Borrowed("s3"));
    /// Dropbox shared-link backend
    pub const DROPBOX: BackendTag = BackendTag(Cow::Borrowed("dropbox"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps the first path segment of a remote identifier to a backend tag
#[derive(Debug, Clone)]
pub struct BackendSelector {
    reserved: HashMap<String, BackendTag>,
    default: BackendTag,
}

impl BackendSelector {
    /// A selector that sends everything to `default`
    pub fn new(default: BackendTag) -> Self {
        Self {
            reserved: HashMap::new(),
            default,
        }
    }

    /// Route paths whose first segment equals `segment` to `tag`
    pub fn reserve(mut self, segment: impl Into<String>, tag: BackendTag) -> Self {
        self.reserved.insert(segment.into(), tag);
        self
    }

    pub fn select(&self, segment: &str) -> BackendTag {
        self.reserved
            .get(segment)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new(BackendTag::OBJECT_STORE).reserve("dropbox", BackendTag::DROPBOX)
    }
}

/// Ordered set of argument names that take part in key differentiation.
///
/// Names are stored lower-cased. The enumeration order is the order in which
/// names were first added, and it fixes the order in which argument values
/// are fed into the digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgAllowList {
    names: Vec<String>,
}

impl ArgAllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for name in names {
            list.insert(name.as_ref());
        }
        list
    }

    pub fn insert(&mut self, name: &str) {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    /// Case-insensitive membership check
    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.names.iter().any(|n| *n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Everything needed to turn a raw remote identifier into a [`Descriptor`]
#[derive(Debug, Clone)]
pub struct DescriptorRules {
    /// Fixed leading path segment stripped from raw identifiers
    pub root: String,
    pub allow_list: ArgAllowList,
    pub backends: BackendSelector,
}

impl Default for DescriptorRules {
    fn default() -> Self {
        Self {
            root: "documents".to_string(),
            allow_list: ArgAllowList::default(),
            backends: BackendSelector::default(),
        }
    }
}

impl DescriptorRules {
    /// Parse `/<root>/<selector>/<rest...>` together with its context arguments.
    ///
    /// Argument names outside the allow-list are dropped.
    pub fn parse<I, K, V>(&self, raw: &str, args: I) -> Result<Descriptor, DescriptorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let without_query = raw.split('?').next().unwrap_or_default();
        let trimmed = without_query.trim_matches('/');
        let stripped = if self.root.is_empty() {
            trimmed
        } else {
            trimmed
                .strip_prefix(self.root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(trimmed)
        };
        let path = stripped.trim_matches('/');

        // We need at least a bucket and a filename. Empty segments are kept
        // in the path, since object keys may contain `//`, but do not count.
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let (Some(selector), Some(_)) = (segments.next(), segments.next()) else {
            return Err(DescriptorError::InvalidPath(raw.to_string()));
        };

        let backend = self.backends.select(selector);
        Ok(Descriptor::with_args(path, backend, args, &self.allow_list))
    }
}

/// Describes a remote object and how it is keyed in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    path: String,
    backend: BackendTag,
    args: HashMap<String, String>,
    args_digest: String,
}

impl Descriptor {
    /// A descriptor with no context arguments
    pub fn new(path: impl Into<String>, backend: BackendTag) -> Self {
        Self {
            path: path.into(),
            backend,
            args: HashMap::new(),
            args_digest: String::new(),
        }
    }

    /// A descriptor for the default object-storage backend
    pub fn for_path(path: impl Into<String>) -> Self {
        Self::new(path, BackendTag::OBJECT_STORE)
    }

    /// A descriptor keeping only the allow-listed arguments, with names lower-cased
    pub fn with_args<I, K, V>(
        path: impl Into<String>,
        backend: BackendTag,
        args: I,
        allow_list: &ArgAllowList,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let args: HashMap<String, String> = args
            .into_iter()
            .map(|(name, value)| (name.as_ref().to_lowercase(), value))
            .filter(|(name, _)| allow_list.contains(name))
            .map(|(name, value)| (name, value.into()))
            .collect();
        let args_digest = args_digest(&args, allow_list);

        Self {
            path: path.into(),
            backend,
            args,
            args_digest,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn backend(&self) -> &BackendTag {
        &self.backend
    }

    /// Allow-listed context arguments, keyed by lower-cased name
    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    /// Hex MD5 of the allow-listed argument values, empty when none matched
    pub fn args_digest(&self) -> &str {
        &self.args_digest
    }

    /// Key shared by the LRU index and the single-flight waiting set
    pub fn unique_key(&self) -> String {
        if self.args_digest.is_empty() {
            self.path.clone()
        } else {
            format!("{}_{}", self.path, self.args_digest)
        }
    }
}

/// Digest over argument values in allow-list order, independent of map order
fn args_digest(args: &HashMap<String, String>, allow_list: &ArgAllowList) -> String {
    let concatenated: String = allow_list
        .iter()
        .filter_map(|name| args.get(name))
        .map(String::as_str)
        .collect();

    if concatenated.is_empty() {
        return String::new();
    }

    hex::encode(Md5::digest(concatenated.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const S3_FILE_PATH: &str = "/documents/test-bucket/foo.bar";
    const DROPBOX_FILE_PATH: &str = "/documents/dropbox/foo.bar";

    fn rules() -> DescriptorRules {
        DescriptorRules {
            allow_list: ArgAllowList::new(["DropboxAccessToken"]),
            ..Default::default()
        }
    }

    fn no_args() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_parse_strips_root_and_leading_slash() {
        let dr = rules().parse(S3_FILE_PATH, no_args()).unwrap();

        assert_eq!(dr.path(), "test-bucket/foo.bar");
        assert!(!dr.path().starts_with('/'));
        assert_eq!(dr.backend(), &BackendTag::OBJECT_STORE);
        assert!(dr.args_digest().is_empty());
    }

    #[test]
    fn test_parse_without_root() {
        let dr = rules().parse("dropbox/foo.bar", no_args()).unwrap();
        assert_eq!(dr.path(), "dropbox/foo.bar");
        assert_eq!(dr.backend(), &BackendTag::DROPBOX);
    }

    #[test]
    fn test_parse_drops_query_and_trailing_slash() {
        let dr = rules()
            .parse("/documents/test-bucket/a/b.pdf/?page=2", no_args())
            .unwrap();
        assert_eq!(dr.path(), "test-bucket/a/b.pdf");
    }

    #[test]
    fn test_parse_rejects_short_paths() {
        let err = rules().parse("/documents/foo-file.pdf", no_args()).unwrap_err();
        assert_eq!(
            err,
            DescriptorError::InvalidPath("/documents/foo-file.pdf".to_string())
        );

        assert!(rules().parse("/documents/", no_args()).is_err());
        assert!(rules().parse("", no_args()).is_err());
        assert!(rules().parse("/documents/bucket//", no_args()).is_err());
    }

    #[test]
    fn test_parse_accepts_empty_inner_segments() {
        let dr = rules()
            .parse("/documents/bucket//file.pdf", no_args())
            .unwrap();
        assert_eq!(dr.path(), "bucket//file.pdf");
        assert_eq!(dr.backend(), &BackendTag::OBJECT_STORE);

        let dr = rules()
            .parse("/documents/dropbox//abc", no_args())
            .unwrap();
        assert_eq!(dr.backend(), &BackendTag::DROPBOX);
    }

    #[test]
    fn test_parse_uses_dropbox_backend() {
        let dr = rules().parse(DROPBOX_FILE_PATH, no_args()).unwrap();
        assert_eq!(dr.backend(), &BackendTag::DROPBOX);
    }

    #[test]
    fn test_custom_backend_selector() {
        let rules = DescriptorRules {
            backends: BackendSelector::default().reserve("gcs", BackendTag::new("gcs")),
            ..Default::default()
        };
        let dr = rules.parse("/documents/gcs/file.txt", no_args()).unwrap();
        assert_eq!(dr.backend().as_str(), "gcs");
    }

    #[test]
    fn test_digest_hashes_only_allow_listed_args() {
        let args = vec![
            ("DropboxAccessToken", "Frodo"),
            ("FoobarAccessToken", "Bilbo"),
        ];
        let dr = rules().parse(DROPBOX_FILE_PATH, args).unwrap();

        assert_eq!(dr.args_digest(), hex::encode(Md5::digest(b"Frodo")));
        assert_eq!(dr.args().len(), 1);
        assert_eq!(dr.args()["dropboxaccesstoken"], "Frodo");
    }

    #[test]
    fn test_digest_ignores_arg_name_casing() {
        let dr = rules()
            .parse(DROPBOX_FILE_PATH, vec![("Dropboxaccesstoken", "Frodo")])
            .unwrap();
        assert_eq!(dr.args_digest(), hex::encode(Md5::digest(b"Frodo")));
    }

    #[test]
    fn test_digest_follows_allow_list_order() {
        let allow_list = ArgAllowList::new(["authorization", "x-api-key"]);

        let forward = Descriptor::with_args(
            "bucket/file",
            BackendTag::OBJECT_STORE,
            vec![("authorization", "a"), ("x-api-key", "b")],
            &allow_list,
        );
        let backward = Descriptor::with_args(
            "bucket/file",
            BackendTag::OBJECT_STORE,
            vec![("X-Api-Key", "b"), ("Authorization", "a")],
            &allow_list,
        );

        assert_eq!(forward.args_digest(), backward.args_digest());
        assert_eq!(forward.args_digest(), hex::encode(Md5::digest(b"ab")));
    }

    #[test]
    fn test_unique_key_differentiates_args() {
        let knock = rules()
            .parse(S3_FILE_PATH, vec![("dropboxaccesstoken", "KnockKnock")])
            .unwrap();
        let come_in = rules()
            .parse(S3_FILE_PATH, vec![("dropboxaccesstoken", "ComeIn")])
            .unwrap();
        let plain = rules().parse(S3_FILE_PATH, no_args()).unwrap();
        let ignored = rules()
            .parse(S3_FILE_PATH, vec![("DummyHeader", "SomeValue")])
            .unwrap();

        assert_ne!(knock.unique_key(), come_in.unique_key());
        assert_eq!(
            knock.unique_key(),
            format!("test-bucket/foo.bar_{}", knock.args_digest())
        );
        assert_eq!(plain.unique_key(), "test-bucket/foo.bar");
        assert_eq!(plain.unique_key(), ignored.unique_key());
    }

    #[test]
    fn test_empty_allow_listed_value_has_no_digest() {
        let dr = rules()
            .parse(S3_FILE_PATH, vec![("DropboxAccessToken", "")])
            .unwrap();
        assert!(dr.args_digest().is_empty());
        assert_eq!(dr.unique_key(), "test-bucket/foo.bar");
    }

    #[test]
    fn test_allow_list_deduplicates_and_lowercases() {
        let mut list = ArgAllowList::new(["Authorization", "authorization"]);
        list.insert(" X-Token ");

        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["authorization", "x-token"]);
        assert!(list.contains("AUTHORIZATION"));
        assert!(!list.contains("cookie"));
    }
}
