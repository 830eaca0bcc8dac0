//! # Interval Executive
//!
//! Drives the connection set on its own task. The executive sleeps until the earlier of the
//! next heartbeat and the next pending stability deadline, then checks timeouts, processes
//! view changes, sends heartbeats and checks stability in one step.
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use super::node::GossipNode;
use super::transport::TransportLayer;

/// An environment problem observed while scheduling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ClockAnomaly {
    /// The wall clock moved backwards, most likely a system clock adjustment.
    Backward { by: Duration },
    /// The executive woke up much later than scheduled.
    Overslept { by: Duration },
}

#[derive(Clone, Debug)]
pub(crate) struct ClockMonitor {
    last_wall: Option<SystemTime>,
    tolerance: Duration,
}

impl ClockMonitor {
    pub(crate) fn new(tolerance: Duration) -> Self {
        Self {
            last_wall: None,
            tolerance,
        }
    }

    /// Observes a wake up scheduled for `scheduled` that happened at `woke`, with the wall clock
    /// reading `wall`.
    pub(crate) fn observe(
        &mut self,
        wall: SystemTime,
        scheduled: std::time::Instant,
        woke: std::time::Instant,
    ) -> Option<ClockAnomaly> {
        let backward = self
            .last_wall
            .and_then(|last| last.duration_since(wall).ok())
            .filter(|by| !by.is_zero());
        self.last_wall = Some(wall);

        if let Some(by) = backward {
            return Some(ClockAnomaly::Backward { by });
        }

        let late = woke.saturating_duration_since(scheduled);
        if late > self.tolerance {
            return Some(ClockAnomaly::Overslept { by: late });
        }

        None
    }
}

pub(crate) struct IntervalExec<T: TransportLayer + 'static> {
    node: GossipNode<T>,
    monitor: ClockMonitor,
}

impl<T: TransportLayer + 'static> IntervalExec<T> {
    pub(crate) fn new(node: GossipNode<T>) -> Self {
        let monitor = ClockMonitor::new(node.config().heartbeat_interval());
        Self { node, monitor }
    }

    pub(crate) async fn run(mut self) {
        let heartbeat_interval = self.node.config().heartbeat_interval();
        let cancel = self.node.cancellation_token();
        let mut next_heartbeat = Instant::now();

        loop {
            let wake = match self.node.next_stability_check().await {
                Some(deadline) => Instant::from_std(deadline).min(next_heartbeat),
                None => next_heartbeat,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(wake) => {}
            }

            let now = Instant::now();
            match self
                .monitor
                .observe(SystemTime::now(), wake.into_std(), now.into_std())
            {
                Some(ClockAnomaly::Backward { by }) => tracing::warn!(
                    "[{}] wall clock moved backwards by {by:?}, system clock adjusted?",
                    self.node.addr()
                ),
                Some(ClockAnomaly::Overslept { by }) => tracing::warn!(
                    "[{}] interval executive overslept by {by:?}",
                    self.node.addr()
                ),
                None => {}
            }

            let send_heartbeat = now >= next_heartbeat;
            if send_heartbeat {
                next_heartbeat = now + heartbeat_interval;
            }

            if let Err(e) = self.node.interval_tick(now.into_std(), send_heartbeat).await {
                tracing::error!("[{}] interval tick failed: {e}", self.node.addr());
            }
        }

        tracing::info!("[{}] interval executive stopped", self.node.addr());
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant, SystemTime};

    use super::{ClockAnomaly, ClockMonitor};

    #[test]
    fn test_clock_monitor_on_time() {
        let mut monitor = ClockMonitor::new(Duration::from_millis(500));
        let wall = SystemTime::now();
        let scheduled = Instant::now();

        assert_eq!(monitor.observe(wall, scheduled, scheduled), None);
        assert_eq!(
            monitor.observe(
                wall + Duration::from_millis(100),
                scheduled,
                scheduled + Duration::from_millis(100)
            ),
            None
        );
    }

    #[test]
    fn test_clock_monitor_detects_backward_wall_clock() {
        let mut monitor = ClockMonitor::new(Duration::from_millis(500));
        let wall = SystemTime::now();
        let scheduled = Instant::now();
        monitor.observe(wall, scheduled, scheduled);

        let result = monitor.observe(wall - Duration::from_secs(60), scheduled, scheduled);

        assert_eq!(
            result,
            Some(ClockAnomaly::Backward {
                by: Duration::from_secs(60)
            })
        );
    }

    #[test]
    fn test_clock_monitor_detects_oversleeping() {
        let mut monitor = ClockMonitor::new(Duration::from_millis(500));
        let scheduled = Instant::now();

        let result = monitor.observe(
            SystemTime::now(),
            scheduled,
            scheduled + Duration::from_secs(2),
        );

        assert_eq!(
            result,
            Some(ClockAnomaly::Overslept {
                by: Duration::from_secs(2)
            })
        );
    }
}
