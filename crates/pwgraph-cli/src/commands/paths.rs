//! Show where the engine would look for a config file.

use clap::Args;

/// Print the config search path and which entry (if any) currently
/// resolves to a file.
#[derive(Args)]
pub struct PathsArgs {
    /// Config file name to search for, overriding `PWGRAPH_CONFIG_NAME`.
    pub name: Option<String>,
}

/// Run the `paths` command.
pub fn run(args: PathsArgs) -> anyhow::Result<()> {
    println!("User config dir: {}", pwgraph_context::user_config_dir().display());
    println!();
    println!("Search path (in order):");
    for path in pwgraph_context::config_search_path(args.name.as_deref()) {
        let marker = if path.is_file() { "*" } else { " " };
        println!("  {marker} {}", path.display());
    }

    match pwgraph_context::find_config(args.name.as_deref()) {
        Some(path) => println!("\nResolved: {}", path.display()),
        None => println!("\nResolved: (none found)"),
    }

    Ok(())
}
