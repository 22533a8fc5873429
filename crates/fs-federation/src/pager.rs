//! Paged enumeration of a directory's visible children.
//!
//! Names are sorted byte-wise on every call. A page token remembers the
//! directory and the last name handed out, so the next page resumes after
//! that name even if entries were added or removed in between.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{not_found_or_io, ConnectorError, Result};
use crate::path::{join_relative, PathMapper};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Resume point for the next page of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    dir: String,
    after: String,
}

impl PageToken {
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Opaque string form handed to hosts.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_vec(self)
            .map(hex::encode)
            .map_err(|error| ConnectorError::Serialization(format!("page token: {error}")))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let invalid = |reason: String| ConnectorError::InvalidInput(format!("page token: {reason}"));
        let bytes = hex::decode(token).map_err(|error| invalid(error.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|error| invalid(error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPage {
    pub names: Vec<String>,
    pub next_token: Option<PageToken>,
}

#[derive(Debug, Clone, Copy)]
pub struct DirectoryPager {
    page_size: usize,
}

impl Default for DirectoryPager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl DirectoryPager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// All visible child names of a directory, sorted.
    pub fn children(&self, mapper: &PathMapper, relative_dir: &str) -> Result<Vec<String>> {
        let native = mapper.resolve(relative_dir)?;
        let address = mapper.address_for(relative_dir);
        let entries = fs::read_dir(&native).map_err(|error| not_found_or_io(&native, &address, error))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| ConnectorError::io(&native, error))?;
            let Ok(name) = entry.file_name().into_string() else {
                log::warn!("skipping non UTF-8 entry {}", entry.path().display());
                continue;
            };
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                // Removed between listing and stat.
                Err(_) => continue,
            };
            if mapper.is_visible(&join_relative(relative_dir, &name), is_dir) {
                names.push(name);
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    /// One page of children, starting after the token's last name.
    pub fn page(
        &self,
        mapper: &PathMapper,
        relative_dir: &str,
        token: Option<&PageToken>,
    ) -> Result<ChildPage> {
        let after = match token {
            Some(token) if token.dir != relative_dir => {
                return Err(ConnectorError::InvalidInput(format!(
                    "page token belongs to '{}', not '{relative_dir}'",
                    token.dir
                )));
            }
            Some(token) => Some(token.after.as_str()),
            None => None,
        };

        let names = self.children(mapper, relative_dir)?;
        let start = match after {
            Some(after) => names.partition_point(|name| name.as_str() <= after),
            None => 0,
        };
        let end = (start + self.page_size).min(names.len());
        let page: Vec<String> = names[start..end].to_vec();
        let next_token = match page.last() {
            Some(last) if end < names.len() => Some(PageToken {
                dir: relative_dir.to_string(),
                after: last.clone(),
            }),
            _ => None,
        };
        Ok(ChildPage {
            names: page,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathFilter;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn mapper_for(dir: &tempfile::TempDir) -> PathMapper {
        PathMapper::new(dir.path().to_path_buf(), "/fs")
            .expect("mapper")
            .with_reserved_suffixes(&[".modeshape.json", ".modeshape.content.json"])
    }

    fn collect_all(pager: &DirectoryPager, mapper: &PathMapper, dir: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut token = None;
        loop {
            let page = pager.page(mapper, dir, token.as_ref()).expect("page");
            assert!(page.names.len() <= pager.page_size());
            names.extend(page.names);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return names,
            }
        }
    }

    #[test]
    fn every_child_appears_exactly_once_for_any_page_size() {
        let dir = tempdir().expect("tempdir");
        for index in 0..47 {
            fs::write(dir.path().join(format!("file-{index:03}.txt")), "x").expect("write");
        }
        let mapper = mapper_for(&dir);

        for page_size in [1, 3, 20, 46, 47, 100] {
            let pager = DirectoryPager::new(page_size);
            let names = collect_all(&pager, &mapper, "");
            let unique: HashSet<_> = names.iter().collect();
            assert_eq!(names.len(), 47, "page size {page_size}");
            assert_eq!(unique.len(), 47, "page size {page_size}");
        }
    }

    #[test]
    fn sidecars_and_filtered_entries_are_not_listed() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        fs::write(dir.path().join("a.txt.modeshape.json"), "{}").expect("write");
        fs::write(dir.path().join("a.txt.modeshape.content.json"), "{}").expect("write");
        fs::write(dir.path().join("b.log"), "b").expect("write");
        let mapper = mapper_for(&dir).with_exclusion(Some(PathFilter::new("*.log").expect("filter")));

        let names = DirectoryPager::default().children(&mapper, "").expect("children");
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[test]
    fn insertions_between_pages_do_not_duplicate() {
        let dir = tempdir().expect("tempdir");
        for name in ["b", "d", "f", "h"] {
            fs::write(dir.path().join(name), "x").expect("write");
        }
        let mapper = mapper_for(&dir);
        let pager = DirectoryPager::new(2);

        let first = pager.page(&mapper, "", None).expect("first");
        assert_eq!(first.names, vec!["b", "d"]);
        fs::write(dir.path().join("a"), "x").expect("write");
        fs::write(dir.path().join("e"), "x").expect("write");

        let second = pager
            .page(&mapper, "", first.next_token.as_ref())
            .expect("second");
        assert_eq!(second.names, vec!["e", "f"]);
    }

    #[test]
    fn tokens_are_opaque_and_bound_to_their_directory() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), "x").expect("write");
        }
        let mapper = mapper_for(&dir);
        let pager = DirectoryPager::new(1);
        let token = pager
            .page(&mapper, "", None)
            .expect("page")
            .next_token
            .expect("token");

        let encoded = token.encode().expect("encode");
        assert_eq!(PageToken::decode(&encoded).expect("decode"), token);
        assert!(PageToken::decode("not-a-token").is_err());
        assert!(matches!(
            pager.page(&mapper, "sub", Some(&token)),
            Err(ConnectorError::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_directory_has_a_single_empty_page() {
        let dir = tempdir().expect("tempdir");
        let page = DirectoryPager::default()
            .page(&mapper_for(&dir), "", None)
            .expect("page");
        assert!(page.names.is_empty());
        assert!(page.next_token.is_none());
    }
}
