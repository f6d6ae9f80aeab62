//! `local_directory`: a managed directory

use crate::error::LocalError;
use crate::{resolve, string_attr};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use terraflow_cloud::{AdapterResult, AttributeDiff, ResourceAdapter};
use terraflow_core::{AttrType, AttributeSchema, Attributes, ResourceObject, ResourceSchema};
use tokio::fs;
use tracing::info;

pub const KIND: &str = "local_directory";

pub struct LocalDirectoryAdapter {
    root: PathBuf,
    schema: ResourceSchema,
}

impl LocalDirectoryAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let schema = ResourceSchema::new(KIND)
            .attribute(
                "path",
                AttributeSchema::required(AttrType::String).force_new(),
            )
            .attribute(
                "absolute_path",
                AttributeSchema::computed(AttrType::String),
            )
            .updatable(false);

        Self {
            root: root.into(),
            schema,
        }
    }

    fn describe(&self, id: &str) -> Attributes {
        Attributes::from([
            ("path".to_string(), json!(id)),
            (
                "absolute_path".to_string(),
                json!(resolve(&self.root, id).display().to_string()),
            ),
        ])
    }
}

#[async_trait]
impl ResourceAdapter for LocalDirectoryAdapter {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    async fn create(&self, attributes: &Attributes) -> AdapterResult<ResourceObject> {
        let id = string_attr(attributes, "path")?.ok_or_else(|| LocalError::InvalidAttribute {
            name: "path".to_string(),
            expected: "a string",
        })?;
        let path = resolve(&self.root, id);

        fs::create_dir_all(&path)
            .await
            .map_err(|e| LocalError::io(&path, e))?;
        info!(path = %path.display(), "Created directory");

        Ok(ResourceObject::new(id, self.describe(id)))
    }

    async fn read(&self, id: &str) -> AdapterResult<Option<Attributes>> {
        let path = resolve(&self.root, id);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(self.describe(id))),
            Ok(_) => Err(LocalError::WrongType {
                path,
                expected: "directory",
            }
            .into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LocalError::io(path, e).into()),
        }
    }

    async fn update(&self, _id: &str, diff: &AttributeDiff) -> AdapterResult<Attributes> {
        let name = diff.changed.iter().next().cloned().unwrap_or_default();
        Err(LocalError::Immutable(name).into())
    }

    /// Only empty directories are removed; managed files inside are
    /// deleted first because they depend on the directory.
    async fn delete(&self, id: &str) -> AdapterResult<()> {
        let path = resolve(&self.root, id);
        fs::remove_dir(&path)
            .await
            .map_err(|e| LocalError::io(&path, e))?;
        info!(path = %path.display(), "Removed directory");
        Ok(())
    }
}
