use clap::Parser;

fn main() {
    let cli = vidrelayctl::Cli::parse();
    if let Err(err) = vidrelayctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
