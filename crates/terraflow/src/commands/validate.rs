use crate::project::Project;
use colored::Colorize;
use std::collections::BTreeMap;
use terraflow_core::{GraphBuilder, StateSnapshot};

pub async fn handle(project: &Project) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());
    println!(
        "プロジェクトファイル: {}",
        project.document.display().to_string().cyan()
    );

    let registry = terraflow_local::registry(&project.root)?;
    let result = project.load_desired().and_then(|desired| {
        GraphBuilder::new(&registry)
            .build(&desired, &StateSnapshot::new())
            .map_err(anyhow::Error::from)
    });

    let graph = match result {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  リソース: {}個", graph.len());
    println!("  依存関係: {}個", graph.edge_count());

    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for node in graph.nodes() {
        *by_kind.entry(node.kind()).or_default() += 1;
    }
    for (kind, count) in by_kind {
        println!("    - {} ({}個)", kind.cyan(), count);
    }

    Ok(())
}
