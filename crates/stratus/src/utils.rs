use crate::{GlobalArgs, ProviderKind, RunArgs};
use anyhow::Context;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stratus_cloud::{
    ActionType, CloudProvider, ExecutorOptions, MemoryProvider, NodeStatus, Plan, RunOutcome,
    RunReport, StackState, StateManager,
};
use stratus_cloud_aws::{AwsOptions, AwsProvider};
use stratus_core::Stack;

/// プロジェクトルートを決定する
///
/// `--project-dir` が指定されていればそれを使い、なければカレントディレクトリから探す。
/// 見つからない場合は STRATUS_CONFIG_PATH やグローバル設定のあるディレクトリを使う。
pub fn resolve_project_root(global: &GlobalArgs) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &global.project_dir {
        return Ok(dir.clone());
    }

    match stratus_core::find_project_root() {
        Ok(root) => Ok(root),
        Err(_) => {
            let config = stratus_config::find_config_file()?;
            Ok(config
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")))
        }
    }
}

/// プロジェクトルートと環境名からスタックを読み込む
pub fn load_stack(global: &GlobalArgs) -> anyhow::Result<(PathBuf, Stack)> {
    let project_root = resolve_project_root(global)?;
    let environment = stratus_config::environment_name(global.env.as_deref());
    tracing::debug!(
        project_root = %project_root.display(),
        environment = %environment,
        "Loading stack"
    );

    let stack = stratus_core::load_stack_from_root(&project_root, &environment)?;
    Ok((project_root, stack))
}

/// 状態ファイルの置き場所
///
/// `.stratus/stratus.json` 形式のプロジェクトでは `.stratus` の親を基点にする。
pub fn state_manager(project_root: &Path, stack: &Stack) -> StateManager {
    let base = if project_root.file_name().is_some_and(|n| n == ".stratus") {
        project_root.parent().unwrap_or(project_root)
    } else {
        project_root
    };
    StateManager::new(base, stack.stack_id())
}

/// 状態を読み込み、指定のプロバイダーで適用されたものか確認する
pub async fn load_state(global: &GlobalArgs, manager: &StateManager) -> anyhow::Result<StackState> {
    let state = manager.load().await?;
    state
        .ensure_provider(global.provider.name())
        .context("--provider に記録時と同じプロバイダーを指定してください")?;
    Ok(state)
}

/// プロバイダーを構築
pub fn build_provider(global: &GlobalArgs, stack: &Stack) -> Arc<dyn CloudProvider> {
    match global.provider {
        ProviderKind::Aws => Arc::new(AwsProvider::new(AwsOptions {
            region: global.region.clone(),
            profile: global.profile.clone(),
            stack_id: stack.stack_id(),
            execution_role_arn: global.execution_role_arn.clone(),
        })),
        ProviderKind::Memory => Arc::new(MemoryProvider::new()),
    }
}

/// 認証状態を確認し、失敗していればエラーにする
pub async fn ensure_authenticated(provider: &dyn CloudProvider) -> anyhow::Result<()> {
    let status = provider
        .check_auth()
        .await
        .with_context(|| format!("{} の認証確認に失敗しました", provider.display_name()))?;

    if !status.authenticated {
        anyhow::bail!(
            "{} に認証されていません: {}",
            provider.display_name(),
            status.error.unwrap_or_default()
        );
    }

    if let Some(account) = &status.account_info {
        println!(
            "プロバイダー: {} ({})",
            provider.display_name().cyan(),
            account
        );
    }
    Ok(())
}

/// CLI 引数とスタック設定から実行オプションを組み立てる
pub fn executor_options(stack: &Stack, args: &RunArgs) -> anyhow::Result<ExecutorOptions> {
    let parallelism = args.parallelism.unwrap_or(stack.settings.parallelism);
    if parallelism == 0 {
        anyhow::bail!("--parallelism は 1 以上を指定してください");
    }
    let timeout_secs = args.timeout.unwrap_or(stack.settings.timeout_secs);

    Ok(ExecutorOptions {
        parallelism,
        timeout: Duration::from_secs(timeout_secs),
        ..ExecutorOptions::default()
    })
}

/// スタックの概要を表示
pub fn print_stack_header(project_root: &Path, stack: &Stack) {
    println!(
        "プロジェクトルート: {}",
        project_root.display().to_string().cyan()
    );
    println!(
        "スタック: {} (環境: {})",
        stack.stack_id().cyan().bold(),
        stack.environment
    );
    println!();
}

/// プランを色付きで表示
pub fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let line = format!(
            "{} {} ({})",
            action.action_type.marker(),
            action.node,
            action.kind
        );
        let line = match action.action_type {
            ActionType::Create => line.green(),
            ActionType::Update => line.yellow(),
            ActionType::Delete => line.red(),
            ActionType::NoOp => line.dimmed(),
        };
        match &action.note {
            Some(note) => println!("  {} [{}]", line, note.dimmed()),
            None => println!("  {}", line),
        }
        for change in &action.changes {
            println!("        {}", change);
        }
    }

    println!();
    if plan.has_changes {
        println!("{} {}", "Plan:".bold(), plan.summary());
    } else {
        println!("{}", "変更はありません。".green());
    }
}

/// 実行結果を表示
pub fn print_report(report: &RunReport) {
    for node in &report.nodes {
        let (marker, status) = match node.status {
            NodeStatus::Done => ("✓".green(), node.status.to_string().green()),
            NodeStatus::Failed => ("✗".red(), node.status.to_string().red()),
            NodeStatus::Skipped => ("-".yellow(), node.status.to_string().yellow()),
            NodeStatus::Pending | NodeStatus::InProgress => {
                ("?".dimmed(), node.status.to_string().dimmed())
            }
        };
        let action = node
            .action
            .map(|a| format!(" {}", a))
            .unwrap_or_default();
        print!("  {} {} ({}) {}{}", marker, node.node, node.kind, status, action);
        match &node.reason {
            Some(reason) => println!(": {}", reason.dimmed()),
            None => println!(),
        }
    }

    println!();
    let elapsed = Duration::from_millis(report.duration_ms).as_secs_f64();
    match report.outcome {
        RunOutcome::Success => println!(
            "{} {} が完了しました ({:.1}s)",
            "✓".green().bold(),
            report.operation,
            elapsed
        ),
        RunOutcome::Failed => eprintln!(
            "{} {} は {} 件のエラーで失敗しました ({:.1}s)",
            "✗".red().bold(),
            report.operation,
            report.errors.len(),
            elapsed
        ),
        RunOutcome::TimedOut => eprintln!(
            "{} {} はタイムアウトしました ({:.1}s)",
            "✗".red().bold(),
            report.operation,
            elapsed
        ),
    }
    for error in &report.errors {
        eprintln!("  {}", error.to_string().red());
    }
}
