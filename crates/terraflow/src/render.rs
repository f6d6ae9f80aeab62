use colored::{ColoredString, Colorize};
use terraflow_cloud::{ApplyReport, NodeOutcome};
use terraflow_core::{Action, AttributeChange, Plan, ResourceDiff};

fn symbol(plan: &Plan, diff: &ResourceDiff) -> ColoredString {
    let symbol = plan.symbol(diff);
    match diff.action {
        Action::Create => symbol.green(),
        Action::Update => symbol.yellow(),
        Action::Replace => symbol.magenta(),
        Action::Destroy => symbol.red(),
        Action::NoOp => symbol.normal(),
    }
}

fn change_line(change: &AttributeChange) -> String {
    let before = change
        .before
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string());
    let after = change
        .after
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string());
    let mut line = format!("      {}: {} → {}", change.name, before, after);
    if change.forces_replace {
        line.push_str(&format!(" {}", "# 再作成が必要".red()));
    }
    line
}

pub fn print_plan(plan: &Plan) {
    if !plan.has_changes() {
        println!(
            "{}",
            "変更はありません。インフラは最新の状態です。".green()
        );
        return;
    }

    println!("{}", "実行計画:".bold());
    println!();
    for diff in plan.diffs.iter().filter(|d| d.action.is_change()) {
        println!("  {} {}", symbol(plan, diff), diff.address.to_string().cyan());
        for change in &diff.changes {
            println!("{}", change_line(change));
        }
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}

pub fn print_report(report: &ApplyReport) {
    println!();
    for node in &report.nodes {
        match &node.outcome {
            NodeOutcome::Succeeded { .. } => {
                println!("  {} {} ({})", "✓".green(), node.key, node.step);
            }
            NodeOutcome::Failed { error, attempts } => {
                println!(
                    "  {} {} ({}, {}回試行)",
                    "✗".red(),
                    node.key,
                    node.step,
                    attempts
                );
                println!("      {}", error.red());
            }
            NodeOutcome::Skipped { blocked_by } => {
                let blocked: Vec<String> = blocked_by.iter().map(ToString::to_string).collect();
                println!(
                    "  {} {} (スキップ: {} が未完了)",
                    "-".yellow(),
                    node.key,
                    blocked.join(", ")
                );
            }
            NodeOutcome::Incomplete => {
                println!("  {} {} (未実行)", "…".yellow(), node.key);
            }
        }
    }

    println!();
    if report.timed_out {
        println!("{}", "実行時間の上限に達したため中断しました".yellow());
    } else if report.cancelled {
        println!("{}", "キャンセルされました".yellow());
    }

    let summary = report.summary();
    if report.is_success() {
        println!(
            "{} {} ({}ms)",
            "✓ 適用完了:".green().bold(),
            summary,
            report.duration_ms
        );
    } else {
        println!(
            "{} {} ({}ms)",
            "✗ 適用が完了しませんでした:".red().bold(),
            summary,
            report.duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use terraflow_core::PlannedValue;

    #[test]
    fn test_change_line_marks_replacement() {
        colored::control::set_override(false);
        let change = AttributeChange {
            name: "path".to_string(),
            before: Some(json!("a.txt")),
            after: Some(PlannedValue::Known(json!("b.txt"))),
            forces_replace: true,
        };
        assert_eq!(
            change_line(&change),
            "      path: \"a.txt\" → \"b.txt\" # 再作成が必要"
        );
    }

    #[test]
    fn test_change_line_unknown_value() {
        colored::control::set_override(false);
        let change = AttributeChange {
            name: "content".to_string(),
            before: None,
            after: Some(PlannedValue::Unknown),
            forces_replace: false,
        };
        assert_eq!(
            change_line(&change),
            "      content: null → (known after apply)"
        );
    }
}
