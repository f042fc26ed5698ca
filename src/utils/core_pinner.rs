use core_affinity::{CoreId, get_core_ids, set_for_current};

/// Pins the calling thread to `core_id`.
///
/// Fails when the id is out of range for this machine or the OS refuses the
/// affinity change.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    let available = get_core_ids().map(|ids| ids.len()).unwrap_or(0);
    if core_id >= available {
        return Err(anyhow::anyhow!(
            "core {core_id} is out of range ({available} cores available)"
        ));
    }
    if set_for_current(CoreId { id: core_id }) {
        Ok(core_id)
    } else {
        Err(anyhow::anyhow!("failed to pin thread to core {core_id}"))
    }
}

/// Pins the calling thread if a core was requested, logging the outcome.
///
/// Pinning failure is not fatal for the engine threads: the thread keeps
/// running unpinned.
pub fn pin_if_requested(thread_label: &str, core_id: Option<usize>) -> Option<usize> {
    let core_id = core_id?;
    match try_pin_core(core_id) {
        Ok(core_id) => {
            tracing::info!("[{thread_label}] pinned to core: {core_id}");
            Some(core_id)
        }
        Err(e) => {
            tracing::error!("[{thread_label}] cannot pin core: {e}");
            None
        }
    }
}
