use clap::{Parser, Subcommand};
use kumade::{DEFAULT_PORT, Layout, Pipeline, TaskName};

#[derive(Parser, Debug)]
#[command(name = "kumade", version, about)]
struct Args {
    /// Port of the development server.
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Build everything once.
    Build,
    /// Build, serve and rebuild on changes (the default).
    #[command(alias = "default")]
    Dev,
    /// Run a single task, e.g. `compileCoreStyles`.
    Run { task: TaskName },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    kumade::init_logging()?;

    let pipeline = Pipeline::standard(Layout::current()?)?;

    match args.command.unwrap_or(Command::Dev) {
        Command::Build => pipeline.build()?,
        Command::Dev => dev(pipeline, args.port)?,
        Command::Run { task } => {
            let written = pipeline.run(task)?;
            tracing::info!("{task} wrote {} file(s)", written.len());
        }
    }

    Ok(())
}

#[cfg(feature = "live")]
fn dev(pipeline: Pipeline, port: u16) -> anyhow::Result<()> {
    match pipeline.dev(port)? {}
}

#[cfg(not(feature = "live"))]
fn dev(_: Pipeline, _: u16) -> anyhow::Result<()> {
    anyhow::bail!("the dev loop needs the `live` feature")
}
