mod fixtures;
mod model;
mod supervisor;

pub use fixtures::*;
pub use model::InMemoryModel;
pub use supervisor::{CreatedSupervisor, MockSupervisor, MockSupervisorFactory};

use std::time::{Duration, Instant};

/// Poll `cond` until it holds or `deadline` elapses. Returns whether the
/// condition was observed.
pub async fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
