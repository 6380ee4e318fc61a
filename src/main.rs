use std::process::ExitCode;

fn main() -> ExitCode {
    plugrack::app::startup::startup()
}
