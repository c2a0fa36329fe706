use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    poflow_cli::run()
}
