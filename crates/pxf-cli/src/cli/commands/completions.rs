use anyhow::Result;
use clap_complete::{generate, Shell};

pub fn run_completions(shell: Shell, cmd: &mut clap::Command) -> Result<()> {
    generate(shell, cmd, "pxf", &mut std::io::stdout());
    Ok(())
}
