use crate::utils;
use crate::{GlobalArgs, RunArgs};
use colored::Colorize;
use stratus_cloud::Executor;

pub async fn handle(global: &GlobalArgs, args: &RunArgs) -> anyhow::Result<()> {
    let (project_root, stack) = utils::load_stack(global)?;
    utils::print_stack_header(&project_root, &stack);
    let options = utils::executor_options(&stack, args)?;

    let manager = utils::state_manager(&project_root, &stack);
    let lock = manager.acquire_lock().await?;
    let mut state = utils::load_state(global, &manager).await?;

    let plan = stratus_cloud::plan_apply(&stack.graph, &state)?;
    utils::print_plan(&plan);
    println!();

    if !args.yes {
        println!(
            "{}",
            "--yes を指定すると、このプランを適用します。".yellow()
        );
        lock.release().await?;
        return Ok(());
    }

    let provider = utils::build_provider(global, &stack);
    utils::ensure_authenticated(provider.as_ref()).await?;

    println!("{}", "適用中...".blue());
    let executor = Executor::new(provider, options);
    let result = executor.apply(&stack.graph, &mut state).await;

    // 途中で失敗しても、それまでに作成したリソースは記録しておく
    manager.save(&state).await?;
    lock.release().await?;

    let report = result?;
    utils::print_report(&report);
    if !report.is_success() {
        anyhow::bail!("apply が完了しませんでした ({})", report.outcome);
    }

    println!(
        "状態ファイル: {}",
        manager.state_path().display().to_string().cyan()
    );
    Ok(())
}
