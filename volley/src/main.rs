use core::error::Error;

use clap::Parser;
use tokio::runtime::Builder;
use volley::{cfg::RunConfig, cmd::Cmd, runtime::Runtime};

pub fn main() {
    let cmd = Cmd::parse();
    if let Err(err) = volley::logging::init(cmd.verbose as usize) {
        eprintln!("ERROR: failed to initialize logging: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cmd) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cmd: Cmd) -> Result<(), Box<dyn Error>> {
    let cfg: RunConfig = cmd.try_into()?;

    Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .thread_name("volley:w")
        .build()?
        .block_on(async {
            let runtime = Runtime::new(cfg);
            runtime.run().await?;

            Ok(())
        })
}
