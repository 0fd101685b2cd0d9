use clap::Parser;
use image_search::Opts;
use image_search::cli::SubCommandExtend;
use image_search::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Serve(config) => config.run(&opts).await,
        SubCommand::Index(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::List(config) => config.run(&opts).await,
    }
}
