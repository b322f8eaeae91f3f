use std::sync::Arc;

use aya::util::online_cpus;
use aya::{include_bytes_aligned, Ebpf};
use aya_log::EbpfLogger;
use clap::Parser;
use log::{debug, info, warn};
use tokio::signal;
use tokio::sync::oneshot;

use fimwatch_common::channel::per_core;

use crate::event::{drain_events, log_losses, wait_events, Drain, PerfLoss};
use crate::registry::PathRegistry;
use crate::setup::{
    check_permission, install_config, install_rules, rule_count, rules_map, version_check, Args,
    Settings,
};

mod event;
mod probes;
mod registry;
mod setup;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::load(&args)?;
    if args.print_layout {
        println!("{}", settings.layout.to_json()?);
        return Ok(());
    }
    check_permission();
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }

    #[cfg(debug_assertions)]
    let mut bpf = Ebpf::load(include_bytes_aligned!(
        "../../target/bpfel-unknown-none/debug/fimwatch"
    ))?;
    #[cfg(not(debug_assertions))]
    let mut bpf = Ebpf::load(include_bytes_aligned!(
        "../../target/bpfel-unknown-none/release/fimwatch"
    ))?;
    if let Err(e) = EbpfLogger::init(&mut bpf) {
        // This can happen if you remove all log statements from your eBPF program.
        warn!("failed to initialize eBPF logger: {}", e);
    }
    version_check(&settings.layout)?;
    install_config(&mut bpf, &settings)?;
    let mut rules = rules_map(&mut bpf)?;
    let mut registry = PathRegistry::default();
    install_rules(&mut rules, &settings, &mut registry);
    debug!("{} path(s) known", registry.len());
    probes::attach(&mut bpf)?;

    let cpus = online_cpus().map_err(|err| anyhow::anyhow!("{:?}", err))?;
    let cores = cpus.iter().max().map_or(0, |max| *max as usize + 1);
    let (senders, queues, drops) = per_core(cores, settings.queue_depth);
    let loss = Arc::new(PerfLoss::new(cores));
    wait_events(&mut bpf, &cpus, &senders, loss.clone())?;
    let drain = Drain::new(registry, rules, settings.ignore_processes.clone());
    let (stop, shutdown) = oneshot::channel();
    let drain = tokio::task::spawn(drain_events(queues, drain, shutdown));

    info!("Waiting for Ctrl-C...");
    signal::ctrl_c().await?;
    let _ = stop.send(());
    let drain = drain.await?;
    log_losses(&drops, &loss, cores);
    let (external, implicit) = rule_count(drain.rules())?;
    info!("{} rule(s) watched, {} added for new directories", external, implicit);
    info!("Exiting...");
    Ok(())
}
