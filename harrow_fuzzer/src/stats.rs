use harrow_core::context::{Region, SharedState};
use std::sync::atomic::Ordering;

/// One line of run statistics, read straight off the shared counters.
pub fn report_line(state: &SharedState) -> String {
    format!(
        "tests {}, errors {}, crashes {}, hangs {}, alarms {}, reforks {}, workers {}",
        state.test_counter.load(Ordering::Relaxed),
        state.call_errors.load(Ordering::Relaxed),
        state.crashes.load(Ordering::Relaxed),
        state.hang_kills.load(Ordering::Relaxed),
        state.alarm_fires.load(Ordering::Relaxed),
        state.reforks.load(Ordering::Relaxed),
        state.running_workers.load(Ordering::Relaxed),
    )
}

pub fn report(region: &Region) {
    log::info!("{}", report_line(&region.state));
}

/// Full end-of-run summary for the stats file.
pub fn summary(state: &SharedState) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "tests:        {}\n",
        state.test_counter.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "call errors:  {}\n",
        state.call_errors.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "crashes:      {}\n",
        state.crashes.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "hang kills:   {}\n",
        state.hang_kills.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "alarm fires:  {}\n",
        state.alarm_fires.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "reforks:      {}\n",
        state.reforks.load(Ordering::Relaxed)
    ));
    s.push_str(&format!(
        "spawned:      {}\n",
        state.total_spawned.load(Ordering::Relaxed)
    ));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::context::Region;

    #[test]
    fn report_line_reflects_counters() {
        let region = Region::new_boxed();
        region.state.test_counter.store(42, Ordering::Relaxed);
        region.state.crashes.store(3, Ordering::Relaxed);
        let line = report_line(&region.state);
        assert!(line.contains("tests 42"));
        assert!(line.contains("crashes 3"));
    }

    #[test]
    fn summary_has_all_counters() {
        let region = Region::new_boxed();
        region.state.hang_kills.store(7, Ordering::Relaxed);
        let s = summary(&region.state);
        assert!(s.contains("hang kills:   7"));
        assert!(s.contains("tests:"));
        assert!(s.contains("reforks:"));
    }
}
