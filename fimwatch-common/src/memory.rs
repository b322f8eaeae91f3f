/// A guarded read could not copy from the requested address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fault;

/// Bounded, non-faulting copies out of kernel memory.
///
/// In the probes this is `bpf_probe_read_kernel`; every read either copies
/// the full value or reports [`Fault`].
pub trait KernelMemory {
    fn read_u64(&self, addr: u64) -> Result<u64, Fault>;
    fn read_u32(&self, addr: u64) -> Result<u32, Fault>;
    fn read_u16(&self, addr: u64) -> Result<u16, Fault>;
    /// Copy a NUL-terminated string into `dst`, returning its length
    /// without the terminator. Longer strings are truncated so that the
    /// copy is always terminated.
    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Fault>;
}

/// `base + offset`, refusing null bases and wrapped addresses.
#[inline(always)]
pub fn field_addr(base: u64, offset: u32) -> Result<u64, Fault> {
    if base == 0 {
        return Err(Fault);
    }
    base.checked_add(offset as u64).ok_or(Fault)
}

/// Read a pointer field, treating a null result as a fault.
#[inline(always)]
pub fn read_ptr<M: KernelMemory>(mem: &M, base: u64, offset: u32) -> Result<u64, Fault> {
    match mem.read_u64(field_addr(base, offset)?)? {
        0 => Err(Fault),
        ptr => Ok(ptr),
    }
}
