mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--offline") => cli::run_offline(),
        Some("--stream") => cli::run_streaming(),
        _ => cli::run_orbit(),
    }
}
