//! Process disguise
//!
//! argv[0] is chosen by whoever spawns us (the CLI or a replica unit). This
//! sets the kernel-side thread name that `top` and `/proc/<pid>/comm` show.

use anyhow::Result;

/// Linux keeps at most 15 bytes of the thread name
const TASK_COMM_LEN: usize = 15;

#[cfg(target_os = "linux")]
pub fn set_process_name(name: &str) -> Result<()> {
    let c_name = std::ffi::CString::new(truncate_comm(name))?;
    nix::sys::prctl::set_name(&c_name)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_name(name: &str) -> Result<()> {
    tracing::debug!("Process renaming unsupported here, keeping argv[0] only ({})", truncate_comm(name));
    Ok(())
}

fn truncate_comm(name: &str) -> &str {
    if name.len() <= TASK_COMM_LEN {
        return name;
    }
    let mut end = TASK_COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
