use crate::GlobalArgs;
use crate::utils;
use colored::Colorize;

pub fn handle(global: &GlobalArgs) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    let (project_root, stack) = utils::load_stack(global)?;
    println!(
        "プロジェクトルート: {}",
        project_root.display().to_string().cyan()
    );

    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  スタック: {}", stack.stack_id().cyan());
    println!("  設定ソース: {}個", stack.tree.sources().len());
    for source in stack.tree.sources() {
        println!("    - {}", source);
    }

    let settings = &stack.settings;
    println!("  ドメイン: {}", settings.domain_name);
    match &settings.database {
        Some(database) => println!(
            "  データベース: {} ({} {})",
            database.identifier.cyan(),
            database.engine,
            database.instance_class
        ),
        None => println!("  データベース: (なし)"),
    }
    println!("  サービス: {}個", settings.services.len());
    for service in &settings.services {
        println!(
            "    - {} ({}, {}台)",
            service.name.cyan(),
            service.image,
            service.desired_count
        );
    }
    println!("  リソース: {}個", stack.graph.len());

    Ok(())
}
