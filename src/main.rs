use clap::Parser;

use rangescribe::cli::{run, Cli};

fn main() {
    rangescribe::logging::init();

    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error[{}]: {error}", error.error_code());
        std::process::exit(1);
    }
}
