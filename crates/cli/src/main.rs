use std::process::ExitCode;

fn main() -> ExitCode {
    noor_cli::run()
}
