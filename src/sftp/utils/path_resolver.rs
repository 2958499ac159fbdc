use std::future::Future;

use log::debug;

use crate::error::Result;

/// Server-side resolution the resolver builds on.
pub trait RealPath {
    /// Asks the server for the canonical form of `path`. `Ok(None)` means the
    /// server answered but could not resolve it.
    fn try_realpath(&self, path: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Turns possibly relative remote paths into canonical absolute ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathResolver {
    working_dir: Option<String>,
}

impl PathResolver {
    pub fn new(working_dir: Option<String>) -> Self {
        Self { working_dir }
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    /// Prefixes a relative path with the working directory.
    pub fn full_path(&self, path: &str) -> String {
        match &self.working_dir {
            Some(dir) if !path.is_empty() && !path.starts_with('/') => {
                if dir.ends_with('/') {
                    format!("{dir}{path}")
                } else {
                    format!("{dir}/{path}")
                }
            }
            _ => path.to_string(),
        }
    }

    /// Resolves `path` on the server. If the server cannot resolve it (for
    /// instance the leaf does not exist yet) the parent is resolved instead
    /// and the original leaf is appended.
    pub async fn canonicalize<R: RealPath>(&self, remote: &R, path: &str) -> Result<String> {
        let full_path = self.full_path(path);

        if let Some(resolved) = non_empty(remote.try_realpath(&full_path).await?) {
            return Ok(resolved);
        }

        if full_path.ends_with("/.")
            || full_path.ends_with("/..")
            || full_path == "/"
            || !full_path.contains('/')
        {
            return Ok(full_path);
        }

        let (parent, leaf) = split_leaf(&full_path);
        debug!("{full_path} did not resolve, trying parent {parent}");
        match non_empty(remote.try_realpath(parent).await?) {
            Some(resolved) if resolved.ends_with('/') => Ok(format!("{resolved}{leaf}")),
            Some(resolved) => Ok(format!("{resolved}/{leaf}")),
            None => Ok(full_path),
        }
    }
}

fn non_empty(path: Option<String>) -> Option<String> {
    path.filter(|p| !p.is_empty())
}

/// Splits at the last separator; a top-level leaf has `/` as its parent.
fn split_leaf(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
