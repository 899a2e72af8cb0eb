mod commands;
mod utils;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "書いた設定が、そのまま環境になる。", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// 全コマンド共通のオプション
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// プロジェクトディレクトリ（省略時はカレントディレクトリから上方向に stratus.json を探す）
    #[arg(short = 'C', long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// 環境名 (staging, production など)
    #[arg(short, long, global = true, env = "STRATUS_ENV")]
    pub env: Option<String>,

    /// 使用するプロバイダー
    #[arg(long, global = true, value_enum, default_value_t = ProviderKind::Aws)]
    pub provider: ProviderKind,

    /// AWS リージョン（省略時は aws CLI の設定に従う）
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// AWS の名前付きプロファイル
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// ECS タスク実行ロールの ARN（シークレットを使うサービスで必要）
    #[arg(long, global = true)]
    pub execution_role_arn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Amazon Web Services (aws CLI 経由)
    Aws,
    /// プロセス内のインメモリバックエンド（検証用）
    Memory,
}

impl ProviderKind {
    /// 状態ファイルに記録されるプロバイダー名
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Memory => "memory",
        }
    }
}

/// apply / destroy の実行オプション
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// 確認なしで実行する（省略時はプランを表示するだけ）
    #[arg(short, long)]
    pub yes: bool,

    /// 実行全体のタイムアウト（秒）。stack.timeout_secs より優先
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// 同時に処理するノード数の上限。stack.parallelism より優先
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// 現在の状態との差分を表示
    Plan,
    /// リソースを作成・更新
    Apply(RunArgs),
    /// リソースを削除
    Destroy(RunArgs),
    /// デプロイ可能なドキュメントを出力
    Synth {
        /// 出力先ファイル（省略時は標準出力）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 設定ファイルを検証
    Validate,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr へ。RUST_LOG 未指定時は warn 以上のみ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("stratus {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate => {
            commands::validate::handle(&cli.global)?;
        }
        Commands::Synth { output } => {
            commands::synth::handle(&cli.global, output.as_deref())?;
        }
        Commands::Plan => {
            commands::plan::handle(&cli.global).await?;
        }
        Commands::Apply(args) => {
            commands::apply::handle(&cli.global, &args).await?;
        }
        Commands::Destroy(args) => {
            commands::destroy::handle(&cli.global, &args).await?;
        }
    }

    Ok(())
}
