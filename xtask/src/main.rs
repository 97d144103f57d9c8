use std::path::PathBuf;

use clap::Parser;
use xscript::{run, LocalEnv, Run};

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    task: Task,
}

#[derive(Debug, Parser)]
enum Task {
    /// Build the documentation including private items.
    Doc,
    /// Cross-compile `otaboot-ctrl` in release mode.
    Build {
        #[clap(default_value = "armv7-unknown-linux-musleabihf")]
        target: String,
    },
}

fn workspace_root() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let env = LocalEnv::new(workspace_root());
    match &args.task {
        Task::Doc => {
            run!(env, ["cargo", "doc", "--workspace", "--no-deps", "--document-private-items"])?;
        }
        Task::Build { target } => {
            run!(env, ["cargo", "build", "--release", "-p", "otaboot-ctrl", "--target", target])?;
            println!(
                "{}",
                workspace_root()
                    .join("target")
                    .join(target)
                    .join("release/otaboot-ctrl")
                    .display()
            );
        }
    }
    Ok(())
}
