use std::process::ExitCode;

fn main() -> ExitCode {
    concierge_cli::run()
}
