//! `local_file`: a file with managed content

use crate::error::LocalError;
use crate::{resolve, string_attr};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use terraflow_cloud::{AdapterResult, AttributeDiff, ResourceAdapter};
use terraflow_core::{AttrType, AttributeSchema, Attributes, ResourceObject, ResourceSchema, Timeouts};
use tokio::fs;
use tracing::{debug, info};

pub const KIND: &str = "local_file";

/// Manages one file; the configured `path` is the resource id
pub struct LocalFileAdapter {
    root: PathBuf,
    schema: ResourceSchema,
}

impl LocalFileAdapter {
    /// Relative paths are resolved against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let schema = ResourceSchema::new(KIND)
            .attribute(
                "path",
                AttributeSchema::required(AttrType::String).force_new(),
            )
            .attribute(
                "content",
                AttributeSchema::optional(AttrType::String).with_default(json!("")),
            )
            .attribute("size", AttributeSchema::computed(AttrType::Number))
            .timeouts(Timeouts {
                create: Some(Duration::from_secs(30)),
                read: Some(Duration::from_secs(10)),
                update: Some(Duration::from_secs(30)),
                delete: Some(Duration::from_secs(30)),
            });

        Self {
            root: root.into(),
            schema,
        }
    }

    async fn write(&self, id: &str, content: &str) -> Result<Attributes, LocalError> {
        let path = resolve(&self.root, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LocalError::io(parent, e))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| LocalError::io(&path, e))?;

        info!(path = %path.display(), bytes = content.len(), "Wrote file");
        Ok(describe(id, content))
    }
}

fn describe(id: &str, content: &str) -> Attributes {
    Attributes::from([
        ("path".to_string(), json!(id)),
        ("content".to_string(), json!(content)),
        ("size".to_string(), json!(content.len())),
    ])
}

#[async_trait]
impl ResourceAdapter for LocalFileAdapter {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    async fn create(&self, attributes: &Attributes) -> AdapterResult<ResourceObject> {
        let id = string_attr(attributes, "path")?.ok_or_else(|| LocalError::InvalidAttribute {
            name: "path".to_string(),
            expected: "a string",
        })?;
        let content = string_attr(attributes, "content")?.unwrap_or_default();

        let attributes = self.write(id, content).await?;
        Ok(ResourceObject::new(id, attributes))
    }

    async fn read(&self, id: &str) -> AdapterResult<Option<Attributes>> {
        let path = resolve(&self.root, id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                Ok(Some(describe(id, &content)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "File is gone");
                Ok(None)
            }
            Err(e) => Err(LocalError::io(path, e).into()),
        }
    }

    async fn update(&self, id: &str, diff: &AttributeDiff) -> AdapterResult<Attributes> {
        if diff.has_changed("path") {
            return Err(LocalError::Immutable("path".to_string()).into());
        }
        let content = string_attr(&diff.after, "content")?.unwrap_or_default();
        Ok(self.write(id, content).await?)
    }

    async fn delete(&self, id: &str) -> AdapterResult<()> {
        let path = resolve(&self.root, id);
        fs::remove_file(&path)
            .await
            .map_err(|e| LocalError::io(&path, e))?;
        info!(path = %path.display(), "Removed file");
        Ok(())
    }
}
