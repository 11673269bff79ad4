use clap::Parser;

use tubescribe::cli::Cli;
use tubescribe::logging;

fn main() {
    logging::init();
    let cli = Cli::parse();
    match cli.execute() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(code = err.error_code(), error = %err, "fatal error");
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    }
}
