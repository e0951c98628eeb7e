use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use kelsie::args_handler::{Args, ChatArgs, Command, ServeArgs};
use kelsie::clock::SystemClock;
use kelsie::llm::LLM;
use kelsie::lookup::{DuckDuckGo, GoogleSearch, KnowledgeLookup};
use kelsie::relay;
use kelsie::session::Session;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args: Args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match args.command {
        Command::Chat(chat) => run_chat(chat),
        Command::Serve(serve) => run_serve(serve),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let lookup = if args.no_search {
        None
    } else {
        let google = GoogleSearch::new(args.google_api_key.clone(), args.google_cse_id.clone())
            .context("unable to create the search client")?;
        let duckduckgo = DuckDuckGo::new().context("unable to create the search client")?;
        Some(KnowledgeLookup::new(Box::new(google), Box::new(duckduckgo)))
    };

    let llm = LLM::new(&args).context("failed to initialize the language model")?;
    info!("model ready");

    let mut session = Session::new(llm, lookup, SystemClock);
    let stdin = std::io::stdin();
    session
        .run(stdin.lock(), std::io::stdout())
        .context("terminal i/o failed")
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("unable to start the tokio runtime")?;
    runtime.block_on(relay::serve(args.relay_config(), &args.bind))
}
