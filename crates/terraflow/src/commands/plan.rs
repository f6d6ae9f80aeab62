use crate::project::Project;
use crate::render;
use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    project: &Project,
    out: Option<&Path>,
    destroy: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let engine = project.engine(cancel)?;
    let plan = if destroy {
        engine.plan_destroy().await?
    } else {
        engine.plan(&project.load_desired()?).await?
    };

    render::print_plan(&plan);

    if let Some(out) = out {
        std::fs::write(out, serde_json::to_string_pretty(&plan)?)?;
        println!();
        println!(
            "{} {}",
            "✓ 実行計画を保存しました:".green(),
            out.display().to_string().cyan()
        );
        println!("適用するには: {} apply {}", "tflow".cyan(), out.display());
    }

    Ok(())
}
