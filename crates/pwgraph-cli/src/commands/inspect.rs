//! Load a config file and print its parsed sections, without building a
//! context.

use clap::Args;
use std::path::PathBuf;

/// Parse and display a `context.*` config file.
#[derive(Args)]
pub struct InspectArgs {
    /// Path to the config file. Falls back to the standard search path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the `inspect` command.
pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let path = args
        .config
        .or_else(|| pwgraph_context::find_config(None))
        .ok_or_else(|| anyhow::anyhow!("no config file given and none found on the search path"))?;

    let config = pwgraph_context::ContextConfig::from_path(&path)?;

    println!("Config: {}", path.display());
    println!();

    println!("context.properties ({}):", config.properties.len());
    for (key, value) in &config.properties {
        println!("  {key} = {value}");
    }

    println!("\ncontext.data-loops ({}):", config.data_loops.len());
    for dl in &config.data_loops {
        println!(
            "  {} class={:?} affinity={:?} priority={:?}",
            dl.name, dl.class, dl.affinity, dl.priority
        );
    }

    println!("\ncontext.spa-libs ({}):", config.spa_libs.len());
    for (pattern, path) in &config.spa_libs {
        println!("  {pattern} -> {}", path);
    }

    println!("\ncontext.modules ({}):", config.modules.len());
    for m in &config.modules {
        println!("  {} flags={:?}", m.name, m.flags);
    }

    println!("\ncontext.objects ({}):", config.objects.len());
    for o in &config.objects {
        println!("  {} flags={:?}", o.factory, o.flags);
    }

    println!("\ncontext.exec ({}):", config.exec.len());
    for e in &config.exec {
        println!("  {} {:?}", e.path, e.args);
    }

    Ok(())
}
