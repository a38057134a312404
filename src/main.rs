use clap::Parser;

fn main() {
    let cli = toolvault::cli::Cli::parse();
    if let Err(err) = toolvault::app::run(cli) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
