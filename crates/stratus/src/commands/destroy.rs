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

    let plan = stratus_cloud::plan_destroy(&stack.graph, &state)?;
    utils::print_plan(&plan);
    println!();

    if !args.yes {
        println!(
            "{}",
            "--yes を指定すると、上記のリソースを削除します。".yellow()
        );
        lock.release().await?;
        return Ok(());
    }

    let provider = utils::build_provider(global, &stack);
    utils::ensure_authenticated(provider.as_ref()).await?;

    println!("{}", "削除中...".blue());
    let executor = Executor::new(provider, options);
    let result = executor.destroy(&stack.graph, &mut state).await;

    manager.save(&state).await?;
    lock.release().await?;

    let report = result?;
    utils::print_report(&report);
    if !report.is_success() {
        anyhow::bail!("destroy が完了しませんでした ({})", report.outcome);
    }

    if !state.is_empty() {
        println!(
            "{} 個のリソースが保持されています",
            state.len().to_string().yellow()
        );
    }
    Ok(())
}
