use std::process::ExitCode;

pub mod cli;
pub mod logging;

pub fn main() -> ExitCode {
    match cli::main() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}
