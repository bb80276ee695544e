//! Process-wide engine bookkeeping: how many hosts are alive. The first host
//! marks the engine up, the last one marks it down.

use parking_lot::Mutex;
use tracing::info;

static LIVE_HOSTS: Mutex<usize> = parking_lot::const_mutex(0);

/// Keeps the engine counted as initialized while held.
#[derive(Debug)]
pub struct EngineGuard(());

impl EngineGuard {
    pub fn acquire() -> Self {
        let mut live = LIVE_HOSTS.lock();
        if *live == 0 {
            info!("initializing transport engine");
        }
        *live += 1;
        Self(())
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        let mut live = LIVE_HOSTS.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            info!("last host released, transport engine down");
        }
    }
}

/// Number of hosts currently holding the engine.
pub fn live_hosts() -> usize {
    *LIVE_HOSTS.lock()
}
