use std::process::ExitCode;

fn main() -> ExitCode {
    intentbot_cli::run()
}
