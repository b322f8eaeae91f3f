#![no_std]
#![no_main]

use aya_ebpf::macros::{kprobe, map};
use aya_ebpf::maps::{Array, HashMap, PerfEventArray};
use aya_ebpf::programs::ProbeContext;
use aya_log_ebpf::debug;

use fimwatch_common::identity::RenameArgs;
use fimwatch_common::probe::{Detector, Propagated, Rejection};
use fimwatch_common::{ProbeConfig, RawEvent, RenameConvention, WatchRule, MAX_RULES};

use crate::kernel::{arg, CurrentTask, PerfSink, ProbeMemory, RuleLookup, RuleWriter};

mod kernel;

#[map]
static RULES: HashMap<u64, WatchRule> = HashMap::with_max_entries(MAX_RULES, 0);
#[map]
static EVENTS: PerfEventArray<RawEvent> = PerfEventArray::new(0);
#[map]
static CONFIG: Array<ProbeConfig> = Array::with_max_entries(1, 0);

/// Bind a detector to this invocation and evaluate `$body` with it.
/// Without a loaded config every probe stays silent.
macro_rules! with_detector {
    ($ctx: expr, |$d: ident| $body: expr) => {{
        let config = CONFIG.get(0).ok_or(Rejection::MalformedReference)?;
        let task = CurrentTask::new($ctx);
        let rules = RuleLookup::new(&RULES);
        let sink = PerfSink::new(&EVENTS, $ctx);
        let $d = Detector::new(&ProbeMemory, config, &task, &rules, &sink);
        $body
    }};
}

// Every probe returns 0 whatever the handler decided; the hooked call
// never observes us.

#[kprobe]
pub fn fim_vfs_write(ctx: ProbeContext) -> u32 {
    let _ = try_vfs_write(&ctx);
    0
}

fn try_vfs_write(ctx: &ProbeContext) -> Result<(), Rejection> {
    let file = arg(ctx, 0)?;
    with_detector!(ctx, |d| d.on_write(file))
}

#[kprobe]
pub fn fim_vfs_rename(ctx: ProbeContext) -> u32 {
    let _ = try_vfs_rename(&ctx);
    0
}

fn try_vfs_rename(ctx: &ProbeContext) -> Result<(), Rejection> {
    with_detector!(ctx, |d| {
        let args = match d.resolver().layout().rename_convention() {
            Some(RenameConvention::RenameData) => d.resolver().rename_data(arg(ctx, 0)?)?,
            Some(RenameConvention::Positional) => RenameArgs {
                old_dentry: arg(ctx, 1)?,
                new_dir: arg(ctx, 2)?,
                new_dentry: arg(ctx, 3)?,
            },
            None => return Err(Rejection::MalformedReference),
        };
        d.on_rename(args)
    })
}

#[kprobe]
pub fn fim_vfs_unlink(ctx: ProbeContext) -> u32 {
    let _ = try_vfs_unlink(&ctx);
    0
}

fn try_vfs_unlink(ctx: &ProbeContext) -> Result<(), Rejection> {
    with_detector!(ctx, |d| {
        let dentry = arg(ctx, d.resolver().layout().unlink_dentry_arg as usize)?;
        d.on_unlink(dentry)
    })
}

#[kprobe]
pub fn fim_vfs_rmdir(ctx: ProbeContext) -> u32 {
    let _ = try_vfs_rmdir(&ctx);
    0
}

fn try_vfs_rmdir(ctx: &ProbeContext) -> Result<(), Rejection> {
    with_detector!(ctx, |d| {
        let dentry = arg(ctx, d.resolver().layout().rmdir_dentry_arg as usize)?;
        d.on_rmdir(dentry)
    })
}

#[kprobe]
pub fn fim_done_path_create(ctx: ProbeContext) -> u32 {
    let _ = try_done_path_create(&ctx);
    0
}

fn try_done_path_create(ctx: &ProbeContext) -> Result<(), Rejection> {
    let path = arg(ctx, 0)?;
    let child = arg(ctx, 1)?;
    with_detector!(ctx, |d| {
        match d.on_mkdir(&RuleWriter::new(&RULES), path, child)? {
            Propagated::Watched(dir) => {
                debug!(ctx, "watching new directory {}/{}", dir.device, dir.inode)
            }
            Propagated::TableFull(dir) => {
                debug!(ctx, "rule table full, {}/{} unwatched", dir.device, dir.inode)
            }
        }
        Ok(())
    })
}

#[kprobe]
pub fn fim_do_dentry_open(ctx: ProbeContext) -> u32 {
    let _ = try_do_dentry_open(&ctx);
    0
}

fn try_do_dentry_open(ctx: &ProbeContext) -> Result<(), Rejection> {
    let file = arg(ctx, 0)?;
    with_detector!(ctx, |d| d.on_open(file))
}

#[cfg(target_arch = "bpf")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
