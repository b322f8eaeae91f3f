//! Device number encodings.
//!
//! The kernel keeps `dev_t` as `major << 20 | minor` inside `super_block`,
//! while `stat(2)` hands userspace the glibc `makedev` layout. Rules are
//! installed from `st_dev`, so every device read in a probe goes through
//! [`encode_kernel_dev`] before it is compared.

const MINORBITS: u32 = 20;
const MINORMASK: u32 = (1 << MINORBITS) - 1;

#[inline(always)]
pub const fn kernel_major(dev: u32) -> u32 {
    dev >> MINORBITS
}

#[inline(always)]
pub const fn kernel_minor(dev: u32) -> u32 {
    dev & MINORMASK
}

//sys/sysmacros.h
#[inline(always)]
pub const fn makedev(major: u32, minor: u32) -> u64 {
    let major = major as u64;
    let minor = minor as u64;
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

#[inline(always)]
pub const fn major(dev: u64) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32
}

#[inline(always)]
pub const fn minor(dev: u64) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32
}

/// Translate a kernel-internal `dev_t` into the `st_dev` encoding.
#[inline(always)]
pub const fn encode_kernel_dev(dev: u32) -> u64 {
    makedev(kernel_major(dev), kernel_minor(dev))
}
