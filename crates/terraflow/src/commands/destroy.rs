use crate::commands::apply;
use crate::project::Project;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

pub async fn handle(project: &Project, yes: bool, cancel: CancellationToken) -> anyhow::Result<()> {
    let engine = project.engine(cancel)?;
    let plan = engine.plan_destroy().await?;

    if plan.has_changes() {
        println!(
            "{}",
            "⚠ 管理しているすべてのリソースを削除します".red().bold()
        );
    }
    apply::execute(&engine, &plan, yes).await
}
