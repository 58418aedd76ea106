use clap::Parser;
use dw_core::cli::{run, Cli};

fn main() {
    let code = run(Cli::parse());
    std::process::exit(code.as_i32());
}
