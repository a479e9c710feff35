use std::process::ExitCode;

fn main() -> ExitCode {
    match ui::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
