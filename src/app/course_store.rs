use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::app::model::{CoursePatch, CourseRecord};

/// Durable home of course records, keyed by course id.
///
/// `save` has merge semantics: the stored record absorbs the patch and is
/// written back whole. Writers are expected to hold the per-course run lock,
/// so last-write-wins is between runs, never within one.
#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn create(&self, record: &CourseRecord) -> anyhow::Result<()>;
    async fn load(&self, course_id: &str) -> anyhow::Result<Option<CourseRecord>>;
    async fn save(&self, course_id: &str, patch: CoursePatch) -> anyhow::Result<CourseRecord>;
}

#[derive(Debug, Clone)]
pub struct LocalFsCourseStore {
    base_dir: PathBuf,
}

impl LocalFsCourseStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn courses_dir(&self) -> PathBuf {
        self.base_dir.join("courses")
    }

    fn course_dir(&self, course_id: &str) -> PathBuf {
        self.courses_dir().join(course_id)
    }

    fn course_json_path(&self, course_id: &str) -> PathBuf {
        self.course_dir(course_id).join("course.json")
    }
}

#[async_trait]
impl CourseStore for LocalFsCourseStore {
    async fn create(&self, record: &CourseRecord) -> anyhow::Result<()> {
        let dir = self.course_dir(&record.course_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create course dir: {}", dir.display()))?;
        write_json_atomic(&self.course_json_path(&record.course_id), record)
            .await
            .context("write course.json")
    }

    async fn load(&self, course_id: &str) -> anyhow::Result<Option<CourseRecord>> {
        let path = self.course_json_path(course_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn save(&self, course_id: &str, patch: CoursePatch) -> anyhow::Result<CourseRecord> {
        let path = self.course_json_path(course_id);
        let mut record: CourseRecord = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .with_context(|| format!("course not found: {course_id}"))?;
        record.apply(patch, Utc::now());
        write_json_atomic(&path, &record)
            .await
            .context("write course.json")?;
        Ok(record)
    }
}

/// In-memory store for tests and embedding without a data directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryCourseStore {
    records: Arc<Mutex<HashMap<String, CourseRecord>>>,
}

impl MemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CourseRecord) -> Self {
        let store = Self::new();
        store
            .records
            .lock()
            .expect("course store mutex poisoned")
            .insert(record.course_id.clone(), record);
        store
    }

    /// Current stored state, for inspection.
    pub fn snapshot(&self, course_id: &str) -> Option<CourseRecord> {
        self.records
            .lock()
            .expect("course store mutex poisoned")
            .get(course_id)
            .cloned()
    }
}

#[async_trait]
impl CourseStore for MemoryCourseStore {
    async fn create(&self, record: &CourseRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("course store mutex poisoned")
            .insert(record.course_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, course_id: &str) -> anyhow::Result<Option<CourseRecord>> {
        Ok(self.snapshot(course_id))
    }

    async fn save(&self, course_id: &str, patch: CoursePatch) -> anyhow::Result<CourseRecord> {
        let mut records = self.records.lock().expect("course store mutex poisoned");
        let record = records
            .get_mut(course_id)
            .with_context(|| format!("course not found: {course_id}"))?;
        record.apply(patch, Utc::now());
        Ok(record.clone())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
