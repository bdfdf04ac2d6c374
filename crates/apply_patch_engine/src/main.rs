use std::io::{self, Read};
use std::process::ExitCode;

use anyhow::Context;

fn main() -> anyhow::Result<ExitCode> {
    let patch = match std::env::args().nth(1) {
        Some(patch) => patch,
        None => {
            let mut patch = String::new();
            io::stdin()
                .read_to_string(&mut patch)
                .context("failed to read patch from stdin")?;
            patch
        }
    };
    if patch.trim().is_empty() {
        anyhow::bail!("usage: apply_patch '<patch>' (or pipe the patch on stdin)");
    }

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    match apply_patch_engine::apply_patch(&patch, &mut stdout, &mut stderr) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(apply_patch_engine::PatchError::Output(error)) => Err(error).context("failed to write output"),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
