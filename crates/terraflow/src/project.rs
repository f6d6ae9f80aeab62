use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use terraflow_cloud::{
    Engine, EngineSettings, ExecutorSettings, FileStateStore, RetryPolicy, StateStore,
};
use terraflow_config::{PROJECT_DIR, Settings};
use terraflow_core::DesiredConfig;
use tokio_util::sync::CancellationToken;

/// 発見したプロジェクト（設定ドキュメント・ルート・設定値）
pub struct Project {
    pub root: PathBuf,
    pub document: PathBuf,
    pub settings: Settings,
}

impl Project {
    pub fn discover() -> anyhow::Result<Self> {
        let document = terraflow_config::find_project_file()?;
        let document = document.canonicalize()?;
        let root = project_root(&document);
        let settings = Settings::load(&root)?;

        tracing::debug!(root = %root.display(), document = %document.display(), "Project discovered");
        Ok(Self {
            root,
            document,
            settings,
        })
    }

    pub fn load_desired(&self) -> anyhow::Result<DesiredConfig> {
        Ok(terraflow_core::load_document(&self.document)?)
    }

    pub fn state_file(&self) -> PathBuf {
        self.settings.state_file(&self.root)
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::new(FileStateStore::new(self.state_file()))
    }

    pub fn engine(&self, cancel: CancellationToken) -> anyhow::Result<Engine> {
        let registry = terraflow_local::registry(&self.root)?;
        Ok(Engine::new(registry, self.store())
            .with_settings(engine_settings(&self.settings))
            .with_cancellation(cancel))
    }
}

/// `.terraflow/` 内のドキュメントはその親ディレクトリをルートとする
fn project_root(document: &Path) -> PathBuf {
    let parent = document.parent().unwrap_or(Path::new("."));
    if parent.file_name() == Some(OsStr::new(PROJECT_DIR)) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

pub fn engine_settings(settings: &Settings) -> EngineSettings {
    let retry = &settings.retry;
    EngineSettings {
        executor: ExecutorSettings {
            parallelism: settings.parallelism,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                multiplier: retry.multiplier,
                max_elapsed: Duration::from_secs(retry.max_elapsed_secs),
            },
            run_timeout: settings.run_timeout_secs.map(Duration::from_secs),
        },
        refresh: settings.refresh,
    }
}
