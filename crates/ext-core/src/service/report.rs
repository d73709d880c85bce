//! Bulk operations and aggregate queries.

use std::collections::BTreeMap;

use serde::Serialize;

use super::LifecycleService;
use crate::Result;
use crate::extension::Extension;
use crate::result::OpResult;

/// Per-id outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub results: Vec<(String, OpResult)>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkReport {
    fn push(&mut self, id: String, result: OpResult) {
        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push((id, result));
    }

    pub fn get(&self, id: &str) -> Option<&OpResult> {
        self.results.iter().find(|(i, _)| i == id).map(|(_, r)| r)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Counts over the discovered extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub broken: usize,
    pub protected: usize,
    pub with_dependencies: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl LifecycleService {
    /// Enable each id in turn; one failure never stops the batch.
    pub fn enable_many<I, S>(&self, ids: I) -> BulkReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BulkReport::default();
        for id in ids {
            let id = id.as_ref();
            report.push(id.to_string(), self.enable(id));
        }
        report
    }

    /// Disable each id in turn; one failure never stops the batch.
    pub fn disable_many<I, S>(&self, ids: I) -> BulkReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BulkReport::default();
        for id in ids {
            let id = id.as_ref();
            report.push(id.to_string(), self.disable(id));
        }
        report
    }

    pub fn stats(&self) -> Result<ExtensionStats> {
        let all = self.all()?;
        let mut stats = ExtensionStats {
            total: all.len(),
            ..Default::default()
        };

        for extension in &all {
            if extension.is_enabled() {
                stats.enabled += 1;
            } else {
                stats.disabled += 1;
            }
            if extension.is_broken() {
                stats.broken += 1;
            }
            if extension.is_protected() {
                stats.protected += 1;
            }
            if extension.has_dependencies() {
                stats.with_dependencies += 1;
            }
            *stats
                .by_type
                .entry(extension.ext_type().to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }

    /// Case-insensitive substring match on name, id, description and author.
    pub fn search(&self, query: &str) -> Result<Vec<Extension>> {
        let query = query.to_lowercase();
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| {
                [e.name(), e.id(), e.description(), e.author()]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&query))
            })
            .collect())
    }

    pub fn find_by_author(&self, author: &str) -> Result<Vec<Extension>> {
        let author = author.to_lowercase();
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| e.author().to_lowercase() == author)
            .collect())
    }

    pub fn broken(&self) -> Result<Vec<Extension>> {
        Ok(self.all()?.into_iter().filter(Extension::is_broken).collect())
    }

    /// Extensions with missing packages or missing required extensions.
    pub fn with_missing_dependencies(&self) -> Result<Vec<Extension>> {
        let mut result = Vec::new();
        for extension in self.all()? {
            if !self.missing_packages(extension.id()).is_empty()
                || !self.missing_extensions(extension.id())?.is_empty()
            {
                result.push(extension);
            }
        }
        Ok(result)
    }

    /// Disabled, working, compatible extensions whose requirements are all met.
    pub fn ready_to_enable(&self) -> Result<Vec<Extension>> {
        let mut result = Vec::new();
        for extension in self.all()? {
            if extension.is_enabled() || extension.is_broken() || !extension.is_compatible() {
                continue;
            }
            if self.missing_packages(extension.id()).is_empty()
                && self.missing_extensions(extension.id())?.is_empty()
            {
                result.push(extension);
            }
        }
        Ok(result)
    }

    /// Bytes used by all extension directories. Cached until the next mutation.
    pub fn total_size(&self) -> Result<u64> {
        let generation = match self.cached(|c| c.total_size) {
            Ok(size) => return Ok(size),
            Err(generation) => generation,
        };
        let size = self.all()?.iter().map(Extension::size).sum();
        self.fill(generation, |c| c.total_size = Some(size));
        Ok(size)
    }

    /// Extensions ordered by directory size, largest first when `desc`.
    pub fn by_size(&self, desc: bool) -> Result<Vec<Extension>> {
        let mut sized: Vec<(u64, Extension)> = self.all()?.into_iter().map(|e| (e.size(), e)).collect();
        sized.sort_by_key(|(size, _)| *size);
        if desc {
            sized.reverse();
        }
        Ok(sized.into_iter().map(|(_, e)| e).collect())
    }
}
