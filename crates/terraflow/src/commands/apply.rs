use crate::project::Project;
use crate::render;
use colored::Colorize;
use std::io::Write;
use std::path::Path;
use terraflow_cloud::Engine;
use terraflow_core::Plan;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    project: &Project,
    plan_file: Option<&Path>,
    yes: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let engine = project.engine(cancel)?;

    let plan: Plan = match plan_file {
        Some(path) => {
            println!(
                "保存済みの実行計画を読み込み中: {}",
                path.display().to_string().cyan()
            );
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => engine.plan(&project.load_desired()?).await?,
    };

    execute(&engine, &plan, yes).await
}

/// 計画を表示し、確認の上で適用する
pub async fn execute(engine: &Engine, plan: &Plan, yes: bool) -> anyhow::Result<()> {
    render::print_plan(plan);
    if !plan.has_changes() {
        return Ok(());
    }

    if !yes && !confirm()? {
        println!("{}", "適用をキャンセルしました。".yellow());
        return Ok(());
    }

    println!();
    println!("{}", "適用中...".blue());
    let report = engine.apply_plan(plan).await?;
    render::print_report(&report);

    if !report.is_success() {
        eprintln!();
        eprintln!(
            "{}",
            "失敗したリソースは、原因を解消してから再度 apply すると続きから実行されます。"
                .yellow()
        );
        std::process::exit(1);
    }

    Ok(())
}

fn confirm() -> anyhow::Result<bool> {
    println!();
    print!("この計画を適用しますか？ [y/N]: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
