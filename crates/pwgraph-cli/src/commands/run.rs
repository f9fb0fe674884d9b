//! Build a graph from a config file and run it for a fixed number of
//! cycles, printing xrun/profiler-style stats (spec §8's observable
//! surface: finished nodes, xruns, per-cycle timing).

use clap::Args;
use pwgraph_context::{Context, ContextConfig};
use pwgraph_core::link::{Endpoint, Link};
use pwgraph_core::node::Node;
use pwgraph_core::port::INVALID_MIX_ID;
use pwgraph_core::thread_utils::DefaultThreadUtils;
use pwgraph_spa::{Direction, NullNode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the graph described by a config's `context.objects` entries
/// (wired as a simple chain, since no concrete media plugin is part of
/// this crate's scope) and run it for a fixed number of cycles.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the config file. Falls back to the standard search path,
    /// then an empty in-memory context if nothing is found.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of scheduler cycles to run.
    #[arg(long, default_value_t = 10)]
    pub cycles: u32,

    /// Nanoseconds between cycles (drives the timestamp passed to
    /// `run_cycle`, not a real sleep).
    #[arg(long, default_value_t = 10_000_000)]
    pub quantum_nsec: u64,
}

/// Run the `run` command.
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let config_path = args.config.or_else(|| pwgraph_context::find_config(None));
    let config = match &config_path {
        Some(path) => ContextConfig::from_path(path)?,
        None => {
            tracing::warn!("no config file found, starting with an empty context");
            ContextConfig::default()
        }
    };

    let mut ctx = Context::new(config.clone(), Arc::new(DefaultThreadUtils))?;

    let mut previous: Option<u64> = None;
    let mut next_id: u64 = 1;
    let mut link_id: u64 = 0;
    let mut driver_id: Option<u64> = None;

    for object in &config.objects {
        if !pwgraph_context::config::conditions_match(&object.condition, ctx.properties()) {
            tracing::debug!(factory = %object.factory, "object condition not met, skipping");
            continue;
        }

        let mut node = Node::new(next_id, Box::new(NullNode::default()));
        if previous.is_none() {
            node.set_driver(true);
            node.set_priority(1);
            driver_id = Some(next_id);
        }

        let mut props = HashMap::new();
        props.insert("factory.name".to_string(), object.factory.clone());
        let node_id = ctx.register_node(node, props)?;
        ctx.register_port(node_id, Direction::Input, 0, HashMap::new())?;
        ctx.register_port(node_id, Direction::Output, 0, HashMap::new())?;

        if let Some(prev_id) = previous {
            let link = Link::new(link_id, endpoint(prev_id), endpoint(node_id));
            let registered_link = ctx.register_link(link, HashMap::new())?;
            ctx.activate_link(registered_link)?;
            link_id += 1;
        }

        previous = Some(node_id);
        next_id += 1;
    }

    if previous.is_none() {
        println!("no objects configured, nothing to run");
        ctx.shutdown();
        return Ok(());
    }

    ctx.recalculate();
    let driver_id = driver_id
        .or_else(|| ctx.freewheel_driver())
        .ok_or_else(|| anyhow::anyhow!("no driver present after recalculation"))?;

    println!(
        "running {} nodes, {} links, driver={driver_id}",
        ctx.node_count(),
        ctx.link_count()
    );

    let mut now = 0u64;
    let mut total_finished = 0usize;
    let mut total_xruns = 0usize;
    for cycle in 0..args.cycles {
        let report = ctx.run_cycle(driver_id, now)?;
        total_finished += report.finished.len();
        total_xruns += report.xruns.len();
        if !report.xruns.is_empty() {
            tracing::warn!(cycle, xruns = ?report.xruns, "cycle had xruns");
        }
        now += args.quantum_nsec;
    }

    println!("ran {} cycles: {total_finished} node-completions, {total_xruns} xruns", args.cycles);

    ctx.shutdown();
    Ok(())
}

fn endpoint(node_id: u64) -> Endpoint {
    Endpoint {
        node_id,
        port_id: 0,
        mix_id: INVALID_MIX_ID,
    }
}
