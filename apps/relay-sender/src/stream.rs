use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    error::SenderError,
    reconnect::{NextStep, ReconnectPolicy, ReconnectTracker},
    source::FrameSource,
    uplink::Uplink,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_sent: u64,
    pub reconnects: u64,
}

/// Pushes frames from a source through an uplink at a fixed rate, recovering
/// from failures within the reconnect policy.
pub struct FrameStreamer<U, S> {
    uplink: U,
    source: S,
    tracker: ReconnectTracker,
    frame_interval: Duration,
    summary: StreamSummary,
}

impl<U: Uplink, S: FrameSource> FrameStreamer<U, S> {
    pub fn new(uplink: U, source: S, policy: ReconnectPolicy, frame_interval: Duration) -> Self {
        Self {
            uplink,
            source,
            tracker: ReconnectTracker::new(policy),
            frame_interval,
            summary: StreamSummary::default(),
        }
    }

    /// Streams until `limit` frames went out, or forever when `None`.
    pub async fn run(mut self, limit: Option<u64>) -> Result<StreamSummary, SenderError> {
        match self.uplink.connect().await {
            Ok(()) => self.tracker.record_success(),
            Err(err) => self.recover_from(err, "initial connect failed").await?,
        }

        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while limit.map_or(true, |limit| self.summary.frames_sent < limit) {
            ticker.tick().await;
            let payload = self.source.next_frame().await?;
            match self.uplink.send(&payload).await {
                Ok(()) => {
                    self.tracker.record_success();
                    self.summary.frames_sent += 1;
                }
                Err(err) => self.recover_from(err, "frame send failed").await?,
            }
        }

        self.uplink.close().await;
        info!(
            frames = self.summary.frames_sent,
            reconnects = self.summary.reconnects,
            "stream finished"
        );
        Ok(self.summary)
    }

    async fn recover_from(&mut self, err: SenderError, context: &str) -> Result<(), SenderError> {
        if err.is_terminal() {
            return self.stop(err).await;
        }
        warn!(error = %err, "{}", context);
        self.recover().await
    }

    /// Reconnects until one attempt succeeds or the policy runs out.
    async fn recover(&mut self) -> Result<(), SenderError> {
        loop {
            match self.tracker.on_failure() {
                NextStep::GiveUp { attempts } => {
                    return self.stop(SenderError::ReconnectExhausted { attempts }).await;
                }
                NextStep::Reconnect { attempt } => {
                    self.summary.reconnects += 1;
                    match self.uplink.connect().await {
                        Ok(()) => {
                            info!(attempt, "reconnected");
                            self.tracker.record_success();
                            return Ok(());
                        }
                        Err(err) if err.is_terminal() => return self.stop(err).await,
                        Err(err) => {
                            warn!(attempt, error = %err, "reconnect failed");
                            if !self.tracker.is_exhausted() {
                                sleep(self.tracker.policy().delay).await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// The single place a stream ends in error.
    async fn stop(&mut self, err: SenderError) -> Result<(), SenderError> {
        self.uplink.close().await;
        error!(
            error = %err,
            frames = self.summary.frames_sent,
            reconnects = self.summary.reconnects,
            "stopping sender"
        );
        Err(err)
    }
}

/// Convenience wrapper used by the binary.
pub async fn stream_frames<U: Uplink, S: FrameSource>(
    uplink: U,
    source: S,
    policy: ReconnectPolicy,
    frame_interval: Duration,
    limit: Option<u64>,
) -> Result<StreamSummary, SenderError> {
    FrameStreamer::new(uplink, source, policy, frame_interval)
        .run(limit)
        .await
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::source::TestPatternSource;

    #[derive(Debug, Default)]
    struct Script {
        connects: VecDeque<bool>,
        sends: VecDeque<bool>,
        connect_calls: u32,
        sent: Vec<String>,
        refuse: bool,
    }

    /// Plays back scripted outcomes; unscripted calls succeed.
    #[derive(Clone, Default)]
    struct ScriptedUplink(Arc<Mutex<Script>>);

    impl ScriptedUplink {
        fn new(connects: &[bool], sends: &[bool]) -> Self {
            let uplink = Self::default();
            {
                let mut script = uplink.0.lock().unwrap();
                script.connects = connects.iter().copied().collect();
                script.sends = sends.iter().copied().collect();
            }
            uplink
        }

        fn refusing() -> Self {
            let uplink = Self::default();
            uplink.0.lock().unwrap().refuse = true;
            uplink
        }

        fn connect_calls(&self) -> u32 {
            self.0.lock().unwrap().connect_calls
        }

        fn sent(&self) -> usize {
            self.0.lock().unwrap().sent.len()
        }
    }

    #[async_trait]
    impl Uplink for ScriptedUplink {
        async fn connect(&mut self) -> Result<(), SenderError> {
            let mut script = self.0.lock().unwrap();
            script.connect_calls += 1;
            if script.refuse {
                return Err(SenderError::Rejected("invalid token".into()));
            }
            if script.connects.pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(SenderError::Closed("refused".into()))
            }
        }

        async fn send(&mut self, payload: &str) -> Result<(), SenderError> {
            let mut script = self.0.lock().unwrap();
            if !script.sends.pop_front().unwrap_or(true) {
                return Err(SenderError::Closed("broken pipe".into()));
            }
            script.sent.push(payload.to_string());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    async fn run(uplink: &ScriptedUplink, limit: u64) -> Result<StreamSummary, SenderError> {
        stream_frames(
            uplink.clone(),
            TestPatternSource::new("cam-1"),
            policy(3),
            Duration::from_millis(1),
            Some(limit),
        )
        .await
    }

    #[test_timeout::tokio_timeout_test]
    async fn four_consecutive_failures_stop_the_sender_once() {
        // One failed send, then three failed reconnects.
        let uplink = ScriptedUplink::new(&[true, false, false, false], &[false]);

        let err = run(&uplink, 10).await.unwrap_err();

        assert!(matches!(err, SenderError::ReconnectExhausted { attempts: 3 }));
        assert_eq!(uplink.connect_calls(), 4);
        assert_eq!(uplink.sent(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn three_failures_then_success_keeps_streaming() {
        let uplink = ScriptedUplink::new(&[true, false, false, true], &[false]);

        let summary = run(&uplink, 5).await.unwrap();

        assert_eq!(summary.frames_sent, 5);
        assert_eq!(summary.reconnects, 3);
        assert_eq!(uplink.sent(), 5);
    }

    #[test_timeout::tokio_timeout_test]
    async fn success_in_between_resets_the_budget() {
        // Two bursts of failures, each within the bound, separated by successes.
        let uplink = ScriptedUplink::new(
            &[true, false, false, true, false, false, true],
            &[false, true, false],
        );

        let summary = run(&uplink, 4).await.unwrap();

        assert_eq!(summary.frames_sent, 4);
        assert_eq!(summary.reconnects, 6);
    }

    #[test_timeout::tokio_timeout_test]
    async fn unreachable_hub_at_startup_is_terminal() {
        let uplink = ScriptedUplink::new(&[false, false, false, false], &[]);

        let err = run(&uplink, 1).await.unwrap_err();

        assert!(matches!(err, SenderError::ReconnectExhausted { attempts: 3 }));
        assert_eq!(uplink.connect_calls(), 4);
    }

    #[test_timeout::tokio_timeout_test]
    async fn refused_admission_stops_without_retrying() {
        let uplink = ScriptedUplink::refusing();

        let err = run(&uplink, 10).await.unwrap_err();

        assert!(matches!(err, SenderError::Rejected(ref reason) if reason == "invalid token"));
        assert_eq!(uplink.connect_calls(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn no_pause_after_the_last_failed_attempt() {
        // A pause after the final attempt would blow well past the deadline.
        let uplink = ScriptedUplink::new(&[true, false], &[false]);
        let slow = ReconnectPolicy {
            max_attempts: 1,
            delay: Duration::from_secs(30),
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            stream_frames(
                uplink.clone(),
                TestPatternSource::new("cam-1"),
                slow,
                Duration::from_millis(1),
                None,
            ),
        )
        .await
        .expect("gave up without sleeping");

        assert!(matches!(outcome, Err(SenderError::ReconnectExhausted { attempts: 1 })));
        assert_eq!(uplink.connect_calls(), 2);
    }
}
