use anyhow::Context;
use aya::programs::KProbe;
use aya::Ebpf;
use log::debug;

/// A program in the object file and the kernel function it hooks.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSpec {
    pub program: &'static str,
    pub function: &'static str,
}

//fs/read_write.c, fs/namei.c, fs/open.c
pub const PROBES: [ProbeSpec; 6] = [
    ProbeSpec {
        program: "fim_vfs_write",
        function: "vfs_write",
    },
    ProbeSpec {
        program: "fim_vfs_rename",
        function: "vfs_rename",
    },
    ProbeSpec {
        program: "fim_vfs_unlink",
        function: "vfs_unlink",
    },
    ProbeSpec {
        program: "fim_vfs_rmdir",
        function: "vfs_rmdir",
    },
    ProbeSpec {
        program: "fim_done_path_create",
        function: "done_path_create",
    },
    ProbeSpec {
        program: "fim_do_dentry_open",
        function: "do_dentry_open",
    },
];

pub fn attach(bpf: &mut Ebpf) -> anyhow::Result<()> {
    for probe in PROBES.iter() {
        let program: &mut KProbe = bpf
            .program_mut(probe.program)
            .with_context(|| format!("program {} not found", probe.program))?
            .try_into()?;
        program.load()?;
        program
            .attach(probe.function, 0)
            .with_context(|| format!("failed to attach {} to {}", probe.program, probe.function))?;
        debug!("{} attached to {}", probe.program, probe.function);
    }
    Ok(())
}
