//! On-disk storage of finished briefs, one JSON file per brief.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::research::model::ResearchBrief;

/// Listing entry for a stored brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefSummary {
    pub id: Uuid,
    pub topic: String,
    pub generated_at: DateTime<Utc>,
    pub source_count: usize,
    pub finding_count: usize,
}

/// Directory of `<id>.json` brief files.
pub struct BriefStore {
    dir: PathBuf,
}

impl BriefStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist a brief. Returns the file written.
    pub fn save(&self, brief: &ResearchBrief) -> io::Result<PathBuf> {
        let path = self.path_for(&brief.id);
        let data = serde_json::to_vec_pretty(brief).map_err(io::Error::other)?;
        write_atomic(&path, &data)?;
        Ok(path)
    }

    /// Load a brief by its full id.
    pub fn load(&self, id: &Uuid) -> io::Result<ResearchBrief> {
        let data = std::fs::read_to_string(self.path_for(id))?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Load the single brief whose id starts with `prefix`.
    ///
    /// `Ok(None)` when nothing matches; `InvalidInput` when the prefix is
    /// ambiguous.
    pub fn find(&self, prefix: &str) -> io::Result<Option<ResearchBrief>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if let Ok(id) = Uuid::parse_str(&prefix) {
            return match self.load(&id) {
                Ok(brief) => Ok(Some(brief)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            };
        }

        let matches: Vec<Uuid> = self
            .ids()?
            .into_iter()
            .filter(|id| id.to_string().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [id] => self.load(id).map(Some),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' matches {} briefs", prefix, matches.len()),
            )),
        }
    }

    fn ids(&self) -> io::Result<Vec<Uuid>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// All readable briefs, newest first. Unreadable files are skipped.
    pub fn list(&self) -> io::Result<Vec<BriefSummary>> {
        let mut summaries: Vec<BriefSummary> = self
            .ids()?
            .iter()
            .filter_map(|id| match self.load(id) {
                Ok(brief) => Some(BriefSummary {
                    id: brief.id,
                    topic: brief.topic,
                    generated_at: brief.generated_at,
                    source_count: brief.sources.len(),
                    finding_count: brief.findings.len(),
                }),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Skipping unreadable brief");
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        Ok(summaries)
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::model::ResearchConfig;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn brief(topic: &str, minutes_ago: i64) -> ResearchBrief {
        ResearchBrief {
            id: Uuid::new_v4(),
            topic: topic.into(),
            executive_summary: "summary".into(),
            findings: Vec::new(),
            open_questions: Vec::new(),
            sources: Vec::new(),
            sub_queries: vec![topic.into()],
            generated_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            config: ResearchConfig::default(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_save_load_and_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = BriefStore::new(dir.path().join("briefs"));
        assert!(store.list().unwrap().is_empty());

        let old = brief("old topic", 60);
        let new = brief("new topic", 1);
        let path = store.save(&old).unwrap();
        store.save(&new).unwrap();
        assert!(path.exists());

        let loaded = store.load(&old.id).unwrap();
        assert_eq!(loaded.topic, "old topic");

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].topic, "new topic");

        // No temp files left behind.
        let leftovers = std::fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_find_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = BriefStore::new(dir.path());
        let b = brief("topic", 0);
        store.save(&b).unwrap();

        let full = b.id.to_string();
        assert_eq!(store.find(&full).unwrap().unwrap().id, b.id);
        assert_eq!(store.find(&full[..8]).unwrap().unwrap().id, b.id);
        assert!(store.find("zzzz").unwrap().is_none());
        assert!(store.find(&Uuid::new_v4().to_string()).unwrap().is_none());
    }

    #[test]
    fn test_list_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = BriefStore::new(dir.path());
        store.save(&brief("ok", 0)).unwrap();
        std::fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), "{not json").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
