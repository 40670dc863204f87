use std::process::ExitCode;

fn main() -> ExitCode {
    taller_cli::run()
}
