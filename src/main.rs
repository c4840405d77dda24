use anyhow::Context;
use std::process;

fn main() -> anyhow::Result<()> {
    let code = taskwright::cli::run().context("taskwright failed")?;
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}
