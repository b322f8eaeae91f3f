use std::process::Command;

use anyhow::{bail, Context};
use clap::Parser;

use crate::build_ebpf::{build_ebpf, Architecture, Options as BuildOptions};

#[derive(Debug, Parser)]
pub struct Options {
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub bpf_target: Architecture,
    /// Build and run the release target
    #[clap(long)]
    pub release: bool,
    /// The command used to wrap your application
    #[clap(short, long, default_value = "sudo -E")]
    pub runner: String,
    /// Arguments to pass to fimwatch
    #[clap(name = "args", last = true)]
    pub run_args: Vec<String>,
}

fn build(opts: &Options) -> Result<(), anyhow::Error> {
    let mut args = vec!["build", "--package", "fimwatch"];
    if opts.release {
        args.push("--release")
    }
    let status = Command::new("cargo")
        .args(&args)
        .status()
        .context("failed to build userspace")?;
    if !status.success() {
        bail!("userspace build failed: {}", status);
    }
    Ok(())
}

/// Build both programs, then run the loader under `runner`.
pub fn run(opts: Options) -> Result<(), anyhow::Error> {
    build_ebpf(BuildOptions {
        target: opts.bpf_target,
        release: opts.release,
    })
    .context("error while building eBPF program")?;
    build(&opts).context("error while building userspace application")?;

    let profile = if opts.release { "release" } else { "debug" };
    let bin_path = format!("target/{profile}/fimwatch");
    let mut runner = opts.runner.split_whitespace();
    let Some(program) = runner.next() else {
        bail!("empty runner");
    };
    let status = Command::new(program)
        .args(runner)
        .arg(&bin_path)
        .args(&opts.run_args)
        .status()
        .with_context(|| format!("failed to run `{} {}`", opts.runner, bin_path))?;
    if !status.success() {
        bail!("fimwatch exited with {}", status);
    }
    Ok(())
}
