use clap::Parser;
use sandboxd_common::GlobalArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = GlobalArgs::parse();
    sandboxd_cli::app::run(args).await
}
