use anyhow::{bail, Context, Result};
use colored::Colorize;
use tokio::process::Command;

/// Run-shell command - run each command in turn, stop at the first failure
pub async fn execute(commands: &[String]) -> Result<()> {
    for line in commands {
        let Some((program, args)) = split_command(line) else {
            continue;
        };

        tracing::info!(command = %line, "Running shell command");
        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to start `{line}`"))?;

        print!("{}", String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
        }

        if !output.status.success() {
            eprintln!("{} `{}` ({})", "Command failed:".red().bold(), line, output.status);
            bail!("`{line}` exited with {}", output.status);
        }
    }
    Ok(())
}

/// Split on whitespace into program and arguments; no quoting rules
fn split_command(line: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = line.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}
