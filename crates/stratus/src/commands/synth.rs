use crate::GlobalArgs;
use crate::utils;
use anyhow::Context;
use colored::Colorize;
use std::path::Path;

/// グラフを JSON ドキュメントとして出力する
///
/// 標準出力に書く場合は、パイプで扱えるよう JSON 以外は何も出力しない。
pub fn handle(global: &GlobalArgs, output: Option<&Path>) -> anyhow::Result<()> {
    let (_, stack) = utils::load_stack(global)?;
    let document = stratus_cloud::synthesize(&stack.stack_id(), &stack.graph)?;
    let json = document.to_json_pretty()?;

    match output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", json))
                .with_context(|| format!("{} に書き込めません", path.display()))?;
            println!(
                "{} {} 個のリソースを書き出しました: {}",
                "✓".green(),
                document.resources.len(),
                path.display().to_string().cyan()
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}
