/// Kernel diagnostic sink
///
/// One line to /dev/kmsg when activation fully completes, so a device
/// log capture shows the module was live in this process even when
/// userspace logging is unavailable. Best-effort only.
use std::fs::OpenOptions;
use std::io::Write;

const KMSG: &str = "/dev/kmsg";

/// Announce full activation to the kernel log.
pub fn announce_activation(hooks_live: usize, hooks_total: usize) {
    let line = format!(
        "<6>netshim: active in pid {}, {hooks_live}/{hooks_total} network hooks live\n",
        std::process::id()
    );
    match OpenOptions::new().write(true).open(KMSG) {
        Ok(mut kmsg) => {
            let _ = kmsg.write_all(line.as_bytes());
        }
        Err(e) => log::debug!("kmsg unavailable: {e}"),
    }
}
