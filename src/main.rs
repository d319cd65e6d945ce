use burn_vgg16_bench::{
    backend::MainAutoBackend,
    config::{BenchConfig, HELP},
    training,
};
use std::io::Write;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match BenchConfig::parse() {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!("{HELP}");
            return Ok(());
        }
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    config.print_arguments(&mut out)?;

    let summary = training::train::<MainAutoBackend>(&config, &mut out)?;
    out.flush()?;
    log::info!(
        "{} steps over {} passes, {} timed samples",
        summary.steps,
        summary.passes.len(),
        summary.samples
    );
    Ok(())
}
