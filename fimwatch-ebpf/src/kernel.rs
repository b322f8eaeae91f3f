use aya_ebpf::helpers::{bpf_probe_read_kernel, bpf_probe_read_kernel_str_bytes};
use aya_ebpf::maps::{HashMap, PerfEventArray};
use aya_ebpf::programs::ProbeContext;
use aya_ebpf::EbpfContext;
use fimwatch_common::memory::{Fault, KernelMemory};
use fimwatch_common::probe::{ChannelFull, EventSink, Rejection, TaskContext};
use fimwatch_common::rules::{RulePropagation, TableFull, WatchRules};
use fimwatch_common::{RawEvent, WatchRule, TASK_COMM_LEN};

//include/uapi/linux/bpf.h
const BPF_ANY: u64 = 0;

macro_rules! read_kernel {
    ($addr: expr, $ty: ty) => {
        unsafe { bpf_probe_read_kernel($addr as *const $ty) }.map_err(|_| Fault)
    };
}

#[inline(always)]
pub fn arg(ctx: &ProbeContext, n: usize) -> Result<u64, Rejection> {
    ctx.arg::<u64>(n).ok_or(Rejection::MalformedReference)
}

/// Guarded reads through `bpf_probe_read_kernel`.
pub struct ProbeMemory;

impl KernelMemory for ProbeMemory {
    #[inline(always)]
    fn read_u64(&self, addr: u64) -> Result<u64, Fault> {
        read_kernel!(addr, u64)
    }

    #[inline(always)]
    fn read_u32(&self, addr: u64) -> Result<u32, Fault> {
        read_kernel!(addr, u32)
    }

    #[inline(always)]
    fn read_u16(&self, addr: u64) -> Result<u16, Fault> {
        read_kernel!(addr, u16)
    }

    #[inline(always)]
    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Fault> {
        unsafe { bpf_probe_read_kernel_str_bytes(addr as *const u8, dst) }
            .map(|s| s.len())
            .map_err(|_| Fault)
    }
}

pub struct CurrentTask<'a> {
    ctx: &'a ProbeContext,
}

impl<'a> CurrentTask<'a> {
    pub fn new(ctx: &'a ProbeContext) -> Self {
        Self { ctx }
    }
}

impl TaskContext for CurrentTask<'_> {
    #[inline(always)]
    fn pid(&self) -> u32 {
        self.ctx.tgid()
    }

    #[inline(always)]
    fn uid(&self) -> u32 {
        self.ctx.uid()
    }

    #[inline(always)]
    fn command(&self) -> Result<[u8; TASK_COMM_LEN], Fault> {
        self.ctx.command().map_err(|_| Fault)
    }
}

/// Read-only view of `RULES`.
pub struct RuleLookup<'a>(&'a HashMap<u64, WatchRule>);

impl<'a> RuleLookup<'a> {
    pub fn new(map: &'a HashMap<u64, WatchRule>) -> Self {
        Self(map)
    }
}

impl WatchRules for RuleLookup<'_> {
    #[inline(always)]
    fn lookup(&self, inode: u64) -> Option<u64> {
        unsafe { self.0.get(&inode) }.map(|rule| rule.device)
    }
}

/// Insert access to `RULES`, handed to the mkdir probe only.
pub struct RuleWriter<'a>(&'a HashMap<u64, WatchRule>);

impl<'a> RuleWriter<'a> {
    pub fn new(map: &'a HashMap<u64, WatchRule>) -> Self {
        Self(map)
    }
}

impl RulePropagation for RuleWriter<'_> {
    #[inline(always)]
    fn propagate(&self, inode: u64, device: u64) -> Result<(), TableFull> {
        self.0
            .insert(&inode, &WatchRule::implicit(device), BPF_ANY)
            .map_err(|_| TableFull)
    }
}

/// Output on the perf ring of the current CPU. The kernel drops records
/// when the ring is full and reports them as lost to the reader.
pub struct PerfSink<'a> {
    events: &'a PerfEventArray<RawEvent>,
    ctx: &'a ProbeContext,
}

impl<'a> PerfSink<'a> {
    pub fn new(events: &'a PerfEventArray<RawEvent>, ctx: &'a ProbeContext) -> Self {
        Self { events, ctx }
    }
}

impl EventSink for PerfSink<'_> {
    #[inline(always)]
    fn submit(&self, event: &RawEvent) -> Result<(), ChannelFull> {
        self.events.output(self.ctx, event, 0);
        Ok(())
    }
}
