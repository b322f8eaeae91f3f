use std::borrow::{Borrow, BorrowMut};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use aya::maps::{Array, HashMap, MapData};
use aya::Ebpf;
use clap::Parser;
use log::{debug, info, warn};
use walkdir::WalkDir;

use fimwatch_common::config::{FileConfig, LayoutConfig, WatchEntry, DEFAULT_QUEUE_DEPTH};
use fimwatch_common::layout::FLAG_STRICT_DEVICE;
use fimwatch_common::{FsIdentity, ProbeConfig, WatchRule};

use crate::registry::PathRegistry;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// json config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// file or directory to watch, may be repeated
    #[arg(short, long)]
    pub watch: Vec<PathBuf>,
    /// watch everything below each --watch directory
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,
    /// if walk dir follow links
    #[arg(short, long, default_value_t = false)]
    pub follow_links: bool,
    /// path prefix to leave unwatched, may be repeated
    #[arg(short, long)]
    pub exclude: Vec<PathBuf>,
    /// drop events of processes whose name starts with this, may be repeated
    #[arg(short, long)]
    pub ignore_comm: Vec<String>,
    /// verify the device on unlink, rmdir and mkdir too
    #[arg(long, default_value_t = false)]
    pub strict_device: bool,
    /// events buffered per cpu before dropping
    #[arg(short, long)]
    pub queue_depth: Option<usize>,
    /// print the kernel layout in use as json and exit
    #[arg(long, default_value_t = false)]
    pub print_layout: bool,
}

/// Config file with the command line applied on top.
#[derive(Debug, Clone)]
pub struct Settings {
    pub watch: Vec<WatchEntry>,
    pub excludes: Vec<PathBuf>,
    pub ignore_processes: Vec<String>,
    pub follow_links: bool,
    pub strict_device: bool,
    pub queue_depth: usize,
    pub layout: LayoutConfig,
}

impl Settings {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(file, args))
    }

    pub fn merge(file: FileConfig, args: &Args) -> Self {
        let mut watch = file.watch;
        watch.extend(
            args.watch
                .iter()
                .map(|path| WatchEntry::new(path.clone(), args.recursive)),
        );
        let mut excludes = file.excludes;
        excludes.extend(args.exclude.iter().cloned());
        let mut ignore_processes = file.ignore_processes;
        ignore_processes.extend(args.ignore_comm.iter().cloned());
        Self {
            watch,
            excludes,
            ignore_processes,
            follow_links: file.follow_links || args.follow_links,
            strict_device: file.strict_device || args.strict_device,
            queue_depth: args
                .queue_depth
                .or(file.queue_depth)
                .unwrap_or(DEFAULT_QUEUE_DEPTH)
                .max(1),
            layout: file.layout,
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        let flags = match self.strict_device {
            true => FLAG_STRICT_DEVICE,
            false => 0,
        };
        ProbeConfig::new(self.layout.offsets, flags)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|prefix| path.starts_with(prefix))
    }
}

pub fn check_permission() {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("currently only supports running as the root user.");
        process::exit(1);
    }
}

fn kernel_mismatch(expected: &str, running: &str) -> bool {
    expected.trim() != running.trim()
}

/// Warn when the layout was taken from another kernel than the running one.
pub fn version_check(layout: &LayoutConfig) -> anyhow::Result<()> {
    let Some(expected) = layout.kernel.as_deref() else {
        debug!("layout carries no kernel version, skipping check");
        return Ok(());
    };
    let running = fs::read_to_string("/proc/version").context("failed to read /proc/version")?;
    if kernel_mismatch(expected, &running) {
        warn!("layout kernel version: {}", expected.trim());
        warn!("current kernel version: {}", running.trim());
        warn!("structure offsets may not match, events can be missed");
    }
    Ok(())
}

pub fn install_config(bpf: &mut Ebpf, settings: &Settings) -> anyhow::Result<()> {
    let mut config: Array<&mut MapData, ProbeConfig> =
        Array::try_from(bpf.map_mut("CONFIG").context("map CONFIG not found")?)?;
    config.set(0, settings.probe_config(), 0)?;
    debug!("probe config installed, strict device: {}", settings.strict_device);
    Ok(())
}

/// A path resolved to the identity the probes match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub identity: FsIdentity,
}

fn target(path: PathBuf, meta: &fs::Metadata) -> WatchTarget {
    WatchTarget {
        path,
        identity: FsIdentity::new(meta.ino(), meta.dev()),
    }
}

/// Expand the watch list into distinct targets. Unreadable entries are
/// skipped with a warning.
pub fn collect_watch_targets(settings: &Settings) -> Vec<WatchTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    let mut push = |t: WatchTarget| {
        if seen.insert(t.identity) {
            targets.push(t);
        }
    };
    for entry in &settings.watch {
        if settings.is_excluded(&entry.path) {
            debug!("{} is excluded", entry.path.display());
            continue;
        }
        if !entry.recursive {
            match fs::metadata(&entry.path) {
                Ok(meta) => push(target(entry.path.clone(), &meta)),
                Err(err) => warn!("skip {}: {}", entry.path.display(), err),
            }
            continue;
        }
        WalkDir::new(&entry.path)
            .follow_links(settings.follow_links)
            .follow_root_links(true)
            .into_iter()
            .filter_entry(|e| !settings.is_excluded(e.path()))
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!("skip entry: {}", err);
                    None
                }
            })
            .for_each(|e| match e.metadata() {
                Ok(meta) => push(target(e.into_path(), &meta)),
                Err(err) => warn!("skip {}: {}", e.path().display(), err),
            });
    }
    targets
}

/// Write side of the kernel rule table.
pub trait RuleTable {
    /// Watch `identity` from now on, as if it had been configured.
    fn watch(&mut self, identity: FsIdentity) -> anyhow::Result<()>;
}

impl<T: BorrowMut<MapData>> RuleTable for HashMap<T, u64, WatchRule> {
    fn watch(&mut self, identity: FsIdentity) -> anyhow::Result<()> {
        self.insert(identity.inode, WatchRule::external(identity.device), 0)?;
        Ok(())
    }
}

pub fn rules_map(bpf: &mut Ebpf) -> anyhow::Result<HashMap<MapData, u64, WatchRule>> {
    Ok(HashMap::try_from(bpf.take_map("RULES").context("map RULES not found")?)?)
}

pub fn install_rules<R: RuleTable>(
    rules: &mut R,
    settings: &Settings,
    registry: &mut PathRegistry,
) -> usize {
    let targets = collect_watch_targets(settings);
    if targets.is_empty() {
        warn!("nothing to watch");
    }
    let mut count = 0;
    debug!("found {} target(s)", targets.len());
    for t in targets {
        if let Err(err) = rules.watch(t.identity) {
            warn!("rule table refused {}: {}", t.path.display(), err);
            break;
        }
        registry.insert(t.identity, t.path);
        count += 1;
    }
    info!("{} path(s) added to watch list", count);
    count
}

/// Count (external, implicit) rules currently in the kernel table.
pub fn rule_count<T: Borrow<MapData>>(
    rules: &HashMap<T, u64, WatchRule>,
) -> anyhow::Result<(usize, usize)> {
    let mut external = 0;
    let mut implicit = 0;
    for item in rules.iter() {
        let (_, rule) = item?;
        match rule.is_implicit() {
            true => implicit += 1,
            false => external += 1,
        }
    }
    Ok((external, implicit))
}
