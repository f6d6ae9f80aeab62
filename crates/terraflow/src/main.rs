mod commands;
mod project;
mod render;

use clap::{Parser, Subcommand};
use colored::Colorize;
use project::Project;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// 2回目の Ctrl-C で終了するときの終了コード（128 + SIGINT）
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "tflow")]
#[command(about = "宣言した状態へ、依存順に収束させる。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 設定を検証
    Validate,
    /// 実行計画を表示
    Plan {
        /// 実行計画をJSONファイルに保存
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// 全リソース削除の計画を作成
        #[arg(long)]
        destroy: bool,
    },
    /// 実行計画を適用
    Apply {
        /// 保存済みの実行計画ファイル（省略時はその場で計画を作成）
        plan: Option<PathBuf>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 管理しているリソースをすべて削除
    Destroy {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// stateを参照
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

/// stateのサブコマンド
#[derive(Subcommand)]
enum StateCommands {
    /// 管理しているリソースの一覧を表示
    List,
    /// リソースの記録内容を表示
    Show {
        /// リソースアドレス（例: local_file.index）
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrに出力（RUST_LOG で制御）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("terraflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let project = Project::discover()?;

    // Ctrl-C で新しいノードの開始を止める（実行中の呼び出しは完了を待つ）
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if let Some(code) = watch_interrupts(watcher, tokio::signal::ctrl_c).await {
            std::process::exit(code);
        }
    });

    // コマンドディスパッチ
    match cli.command {
        Commands::Validate => {
            commands::validate::handle(&project).await?;
        }
        Commands::Plan { out, destroy } => {
            commands::plan::handle(&project, out.as_deref(), destroy, cancel).await?;
        }
        Commands::Apply { plan, yes } => {
            commands::apply::handle(&project, plan.as_deref(), yes, cancel).await?;
        }
        Commands::Destroy { yes } => {
            commands::destroy::handle(&project, yes, cancel).await?;
        }
        Commands::State(StateCommands::List) => {
            commands::state::list(&project).await?;
        }
        Commands::State(StateCommands::Show { address }) => {
            commands::state::show(&project, &address).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before project discovery");
        }
    }

    Ok(())
}

/// Ctrl-C を監視する
///
/// 1回目はキャンセルを要求し、2回目で即時終了用の終了コードを返す。
async fn watch_interrupts<F, Fut>(cancel: CancellationToken, mut signal: F) -> Option<i32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    while signal().await.is_ok() {
        if cancel.is_cancelled() {
            eprintln!("{}", "強制終了します。stateが最新でない可能性があります。".red());
            return Some(EXIT_INTERRUPTED);
        }
        eprintln!();
        eprintln!(
            "{}",
            "中断要求を受け付けました。実行中の処理の完了を待っています...（もう一度 Ctrl-C で強制終了）"
                .yellow()
        );
        cancel.cancel();
    }
    None
}
