//! # Integration Tests
//!
//! End-to-end runs of the capture pipeline against `MockDevice`.
//!
//! Every scenario finishes by checking the buffer ledger: each buffer the
//! device handed out must come back exactly once.

#[cfg(test)]
mod contract_tests {
    use contracts::{ExerciserConfig, SessionState};

    #[test]
    fn test_defaults_describe_zsl() {
        let config = ExerciserConfig::default();
        assert_eq!(config.pairing.capacity, 1);
        assert!(config.reprocess.enabled);
        assert_eq!(SessionState::default(), SessionState::Closed);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        CloseReason, ExerciserConfig, FinalImage, ReprocessMode, SessionState,
    };
    use device::{MockDevice, MockDeviceConfig};
    use dispatcher::{
        CapturePipeline, ChannelSink, DispatcherError, OutputFanout, PipelineHandle, SinkHandle,
    };
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        handle: PipelineHandle,
        device: Arc<MockDevice>,
        images: mpsc::UnboundedReceiver<FinalImage>,
    }

    fn start(config: ExerciserConfig, device_config: MockDeviceConfig) -> Harness {
        let device = Arc::new(MockDevice::new(device_config));
        let (sink, images) = ChannelSink::new("collect");
        let fanout = OutputFanout::with_handles(vec![SinkHandle::spawn(sink, 16)]);
        let handle = CapturePipeline::spawn(config, device.clone(), fanout);
        Harness {
            handle,
            device,
            images,
        }
    }

    async fn next_image(images: &mut mpsc::UnboundedReceiver<FinalImage>) -> FinalImage {
        tokio::time::timeout(WAIT, images.recv())
            .await
            .expect("final image in time")
            .expect("sink channel open")
    }

    fn assert_balanced(device: &MockDevice) {
        let report = device.ledger().report();
        assert!(report.is_balanced(), "ledger unbalanced: {report}");
    }

    #[tokio::test]
    async fn test_zsl_shots_from_loaded_config_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[device]
camera_id = "0"

[pairing]
capacity = 1

[[sinks]]
name = "jpeg"
sink_type = "file"
[sinks.params]
base_path = "{}"
"#,
            dir.path().display()
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        let device = Arc::new(MockDevice::new(MockDeviceConfig::fast()));
        let handle = CapturePipeline::from_config(config, device.clone())
            .await
            .unwrap();

        handle.open("0").await.unwrap();
        handle.wait_until_ready(WAIT).await.unwrap();

        for _ in 0..3 {
            assert!(handle.retained_pairs() <= 1);
            handle.wait_until_ready(WAIT).await.unwrap();
            match handle.trigger_reprocess().await {
                Ok(_) => {}
                // Pair taken by the previous shot and not yet replaced
                Err(e) if e.is_not_ready() => {}
                Err(e) => panic!("unexpected shot failure: {e}"),
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.final_state, SessionState::Closed);
        assert!(report.summary.reprocess_completed >= 1);

        let written = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".jpg"))
            .count();
        assert_eq!(written as u64, report.summary.final_images);
        assert_balanced(&device);
    }

    #[tokio::test]
    async fn test_parallel_capture_with_capacity_two() {
        let mut config = ExerciserConfig::default();
        config.reprocess.mode = ReprocessMode::ParallelCapture;
        config.pairing.capacity = 2;
        let mut h = start(config, MockDeviceConfig::fast());

        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();

        h.handle.capture_still().await.unwrap();
        h.handle.capture_still().await.unwrap();
        let first = next_image(&mut h.images).await;
        let second = next_image(&mut h.images).await;
        assert_ne!(first.request_id, second.request_id);

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.summary.stills_submitted, 2);
        assert_eq!(report.summary.reprocess_submitted, 2);
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_reprocess_disabled_captures_directly() {
        let mut config = ExerciserConfig::default();
        config.reprocess.enabled = false;
        let mut h = start(config, MockDeviceConfig::fast());

        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();

        let err = h.handle.trigger_reprocess().await.unwrap_err();
        assert!(err.is_not_ready());

        h.handle.capture_still().await.unwrap();
        let image = next_image(&mut h.images).await;
        assert!(!image.data.is_empty());

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.summary.reprocess_submitted, 0);
        assert_eq!(report.pairing.formed, 0);
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_configure_failure_closes_session() {
        let device_config = MockDeviceConfig {
            fail_configure: true,
            ..MockDeviceConfig::fast()
        };
        let h = start(ExerciserConfig::default(), device_config);

        h.handle.open("0").await.unwrap();
        h.handle.wait_for_state(SessionState::Closing, WAIT).await.ok();
        h.handle
            .wait_for_state(SessionState::Closed, WAIT)
            .await
            .unwrap();
        assert!(!h.handle.is_ready());

        let err = h.handle.trigger_reprocess().await.unwrap_err();
        assert!(err.is_not_ready());

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.last_close_reason, Some(CloseReason::ConfigureFailed));
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_open_failure_reports_device_error() {
        let device_config = MockDeviceConfig {
            fail_open: Some(4),
            ..MockDeviceConfig::fast()
        };
        let h = start(ExerciserConfig::default(), device_config);

        h.handle.open("0").await.unwrap();
        let ready = h.handle.wait_until_ready(Duration::from_millis(300)).await;
        assert!(matches!(ready, Err(DispatcherError::Timeout { .. })));

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.final_state, SessionState::Closed);
        assert_eq!(report.last_close_reason, Some(CloseReason::DeviceError(4)));
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_disconnect_drains_retained_pairs() {
        let h = start(ExerciserConfig::default(), MockDeviceConfig::fast());
        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();

        let mut ready = h.handle.ready();
        h.device.simulate_disconnect();
        tokio::time::timeout(WAIT, ready.wait_for(|r| !*r))
            .await
            .unwrap()
            .unwrap();
        h.handle
            .wait_for_state(SessionState::Closed, WAIT)
            .await
            .unwrap();
        assert_eq!(h.handle.retained_pairs(), 0);

        let err = h.handle.trigger_reprocess().await.unwrap_err();
        assert!(err.is_not_ready());

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.last_close_reason, Some(CloseReason::Disconnected));
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let h = start(ExerciserConfig::default(), MockDeviceConfig::fast());

        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();
        h.handle.close().await.unwrap();
        h.handle
            .wait_for_state(SessionState::Closed, WAIT)
            .await
            .unwrap();
        assert!(!h.handle.is_ready());

        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();
        assert_eq!(h.handle.session_state(), SessionState::Active);
        h.handle.trigger_reprocess().await.unwrap();

        h.handle.shutdown().await.unwrap();
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_switch_camera_moves_session() {
        let h = start(ExerciserConfig::default(), MockDeviceConfig::fast());
        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();

        h.handle.switch_camera("1").await.unwrap();
        h.handle.wait_for_state(SessionState::Closing, WAIT).await.ok();
        h.handle.wait_until_ready(WAIT).await.unwrap();
        assert_eq!(h.device.camera_id().as_deref(), Some("1"));

        h.handle.shutdown().await.unwrap();
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_lost_buffers_stay_balanced() {
        let device_config = MockDeviceConfig {
            drop_buffer_every: Some(3),
            ..MockDeviceConfig::fast()
        };
        let h = start(ExerciserConfig::default(), device_config);
        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = h.handle.shutdown().await.unwrap();
        assert!(report.summary.buffers_lost > 0);
        assert!(report.pairing.evicted > 0);
        assert_balanced(&h.device);
    }

    #[tokio::test]
    async fn test_submission_failure_closes_and_releases() {
        let h = start(ExerciserConfig::default(), MockDeviceConfig::fast());
        h.handle.open("0").await.unwrap();
        h.handle.wait_until_ready(WAIT).await.unwrap();

        h.device.set_reject_submissions(true);
        let err = h.handle.trigger_reprocess().await.unwrap_err();
        assert!(!err.is_not_ready());
        h.handle
            .wait_for_state(SessionState::Closed, WAIT)
            .await
            .unwrap();

        let report = h.handle.shutdown().await.unwrap();
        assert_eq!(report.summary.reprocess_failed, 1);
        assert_eq!(report.last_close_reason, Some(CloseReason::SubmissionFailed));
        assert_balanced(&h.device);
    }
}
