use crate::GlobalArgs;
use crate::utils;

/// 記録済みの状態と比較した差分を表示する（プロバイダーは呼ばない）
pub async fn handle(global: &GlobalArgs) -> anyhow::Result<()> {
    let (project_root, stack) = utils::load_stack(global)?;
    utils::print_stack_header(&project_root, &stack);

    let manager = utils::state_manager(&project_root, &stack);
    let state = utils::load_state(global, &manager).await?;
    let plan = stratus_cloud::plan_apply(&stack.graph, &state)?;
    utils::print_plan(&plan);

    Ok(())
}
