use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// A normalized, slash-delimited location under the configured root on the
/// remote store.
///
/// Invariants: no backslashes, no duplicate separators, no trailing
/// separator (root `/` excepted), NFKC-folded so that two paths naming the
/// same remote location compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Canonicalize an arbitrary slash- or backslash-delimited path.
    ///
    /// Total function: any input produces a valid `RemotePath`.
    pub fn normalize(input: &str) -> Self {
        let mut out = String::with_capacity(input.len());
        let mut prev_slash = false;
        for ch in input.chars() {
            let ch = if ch == '\\' { '/' } else { ch };
            if ch == '/' {
                if prev_slash {
                    continue;
                }
                prev_slash = true;
            } else {
                prev_slash = false;
            }
            out.push(ch);
        }

        if out.ends_with("/.") {
            out.truncate(out.len() - 1);
        }
        if out.len() > 1 && out.ends_with('/') {
            out.pop();
        }

        RemotePath(out.nfkc().collect())
    }

    /// The root path (`/`).
    pub fn root() -> Self {
        RemotePath("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty() || self.0 == "/"
    }

    /// Path segments, root and empty segments excluded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Every ancestor prefix from the first segment down to the full path.
    ///
    /// `a/b/c` yields `a`, `a/b`, `a/b/c` (absolute inputs keep the
    /// leading slash). Used by segment-by-segment directory creation.
    pub fn prefixes(&self) -> Vec<RemotePath> {
        let absolute = self.0.starts_with('/');
        let mut acc = String::new();
        let mut out = Vec::new();
        for segment in self.segments() {
            if acc.is_empty() && !absolute {
                acc.push_str(segment);
            } else {
                acc.push('/');
                acc.push_str(segment);
            }
            out.push(RemotePath(acc.clone()));
        }
        out
    }

    /// Append a single entry name.
    pub fn join(&self, name: &str) -> RemotePath {
        let name: String = name.nfkc().collect();
        if self.is_root() {
            RemotePath(format!("/{name}"))
        } else {
            RemotePath(format!("{}/{name}", self.0))
        }
    }

    /// Final segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Everything before the final segment.
    pub fn parent(&self) -> RemotePath {
        match self.0.rfind('/') {
            Some(0) => RemotePath::root(),
            Some(idx) => RemotePath(self.0[..idx].to_string()),
            None => RemotePath(String::new()),
        }
    }

    /// Extension of the final segment, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let idx = name.rfind('.')?;
        if idx == 0 || idx + 1 == name.len() {
            return None;
        }
        Some(name[idx + 1..].to_ascii_lowercase())
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for RemotePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RemotePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RemotePath::normalize(&raw))
    }
}

impl From<&str> for RemotePath {
    fn from(value: &str) -> Self {
        RemotePath::normalize(value)
    }
}

/// NFKC-fold a single entry name for equality comparisons.
pub fn normalize_name(name: &str) -> String {
    name.nfkc().collect()
}
