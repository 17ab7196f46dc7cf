use anyhow::Result;
use clap::{App, Arg};
use tokio_util::sync::CancellationToken;

#[tokio::main]
pub async fn main() -> Result<()> {

    let options = App::new("hopper")
        .version("1.0")
        .about("Hopper watches a folder for delimited, spreadsheet and JSON files and loads them into relational tables with a write-audit-publish discipline.")
        .arg(Arg::with_name("sources_path")
            .help("The full path to the sources yaml file describing each feed, its row-model and its target table")
            .required(true)
            .takes_value(true))
        .arg(Arg::with_name("once")
            .long("once")
            .help("Scan the watch folder once and exit, rather than polling"))
        .get_matches();

    dotenv::dotenv().ok();
    let _ = env_logger::try_init();

    let settings = hopper::config::Settings::from_env()?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested - running pipelines will stop at their next checkpoint");
            signal.cancel();
        }
    });

    hopper::run(
        options.value_of("sources_path").expect("no sources file specified"),
        settings,
        options.is_present("once"),
        cancel).await?;

    Ok(())
}
