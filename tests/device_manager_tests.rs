//! End-to-end scenarios against the device facade

use accelforge::dma::{DmaBus, HostRegion, SimBus, PAGE_SIZE};
use accelforge::error::AccelError;
use accelforge::fence::JobStatus;
use accelforge::handle::Handle;
use accelforge::{DeviceConfig, DeviceManager, ErrorCode, InferenceRequest};
use std::sync::Arc;
use std::time::Duration;

fn config() -> DeviceConfig {
    DeviceConfig::new()
        .with_memory_size(256 * 4096)
        .with_max_alloc_size(64 * 4096)
        .with_sim_latency(Duration::from_millis(2))
}

fn device() -> DeviceManager {
    DeviceManager::new(config()).unwrap()
}

/// Submit one job against freshly allocated buffers and a tiny model
fn submit_one(dev: &DeviceManager, size: u64) -> (u64, Handle, Handle, Handle) {
    let (input, _) = dev.alloc(size, 0).unwrap();
    let (output, _) = dev.alloc(size, 0).unwrap();
    let model = dev.load_model(&[7u8; 256], 0).unwrap();
    let fence = dev
        .submit_inference(&InferenceRequest {
            model,
            input,
            output,
            input_size: size,
            output_size: size,
            priority: 0,
        })
        .unwrap();
    (fence, model, input, output)
}

#[test]
fn test_alloc_free_free_scenario() {
    let dev = device();

    let (handle, _) = dev.alloc(4096, 0).unwrap();
    assert!(dev.free(handle).is_ok());

    let err = dev.free(handle).unwrap_err();
    assert!(matches!(err, AccelError::HandleNotFound(_)));
}

#[test]
fn test_invalid_alloc_sizes_leave_table_unchanged() {
    let dev = device();
    let (held, _) = dev.alloc(4096, 0).unwrap();
    let before = dev.stats();

    for size in [0u64, 64 * 4096 + 1] {
        let err = dev.alloc(size, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    let after = dev.stats();
    assert_eq!(before.live_buffers, after.live_buffers);
    assert_eq!(before.memory_used, after.memory_used);
    dev.free(held).unwrap();
}

#[test]
fn test_submit_with_unregistered_model_issues_no_fence() {
    let dev = device();
    let (input, _) = dev.alloc(4096, 0).unwrap();
    let (output, _) = dev.alloc(4096, 0).unwrap();

    let err = dev
        .submit_inference(&InferenceRequest {
            model: Handle::from_raw(33),
            input,
            output,
            input_size: 4096,
            output_size: 4096,
            priority: 0,
        })
        .unwrap_err();

    assert!(matches!(err, AccelError::HandleNotFound(33)));
    // No fence was consumed and no channel stayed leased
    assert_eq!(dev.last_fence(), 0);
    assert_eq!(dev.stats().free_channels, 4);
    assert_eq!(dev.stats().jobs_submitted, 0);
}

#[test]
fn test_submit_and_wait_completes() {
    let dev = device();
    let (fence, _, _, _) = submit_one(&dev, 8192);

    let status = dev.wait(fence, Duration::from_secs(5)).unwrap();
    assert_eq!(status, JobStatus::Complete);

    // The completion context updates counters after waking waiters
    std::thread::sleep(Duration::from_millis(20));
    let stats = dev.stats();
    assert_eq!(stats.jobs_submitted, 1);
    assert_eq!(stats.jobs_completed, 1);
    assert_eq!(stats.bytes_transferred, 2 * 8192);
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.free_channels, 4);

    let profile = dev.job_profile(fence).unwrap();
    assert_eq!(profile.bytes, 2 * 8192);
    assert!(profile.duration().is_some());
}

#[test]
fn test_wait_deadline_terminates_running_job() {
    let dev = DeviceManager::new(config().with_sim_latency(Duration::from_millis(200))).unwrap();
    let (fence, _, _, _) = submit_one(&dev, 4096);

    let err = dev.wait(fence, Duration::from_millis(5)).unwrap_err();
    assert!(matches!(err, AccelError::Timeout(_)));

    // The job transitioned to the TimedOut terminal state, and every
    // later waiter observes it
    assert_eq!(dev.poll(fence).unwrap(), JobStatus::TimedOut);
    assert_eq!(dev.wait(fence, Duration::from_secs(1)).unwrap(), JobStatus::TimedOut);
    assert_eq!(dev.stats().jobs_timed_out, 1);

    // The terminated worker returns its channel once the bus notices
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(dev.stats().free_channels, 4);
}

#[test]
fn test_multiple_waiters_observe_same_status() {
    let dev = Arc::new(DeviceManager::new(
        config().with_sim_latency(Duration::from_millis(50)),
    )
    .unwrap());
    let (fence, _, _, _) = submit_one(&dev, 4096);

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let dev = Arc::clone(&dev);
        waiters.push(std::thread::spawn(move || {
            dev.wait(fence, Duration::from_secs(5)).unwrap()
        }));
    }

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), JobStatus::Complete);
    }
}

#[test]
fn test_fences_are_distinct_and_increasing_across_jobs() {
    let dev = device();
    let mut fences = Vec::new();
    for _ in 0..6 {
        let (fence, _, _, _) = submit_one(&dev, 4096);
        dev.wait(fence, Duration::from_secs(5)).unwrap();
        fences.push(fence);
    }

    for pair in fences.windows(2) {
        assert!(pair[1] > pair[0]);
    }
    assert_eq!(fences, (1..=6).collect::<Vec<u64>>());
}

#[test]
fn test_write_and_read_buffer_pin_cycle() {
    let sim = Arc::new(SimBus::with_latency(Duration::from_millis(1)));
    let bus: Arc<dyn DmaBus> = sim.clone();
    let dev = DeviceManager::with_bus(config(), bus).unwrap();

    let size = 3 * PAGE_SIZE;
    let (handle, _) = dev.alloc(size, 0).unwrap();

    // Discontiguous host range starting mid-page
    let host = HostRegion::new(0x7f00_0000_0040, size);
    let written = dev
        .write_buffer(handle, host, Duration::from_secs(5))
        .unwrap();
    assert_eq!(written, size);

    let read = dev
        .read_buffer(handle, HostRegion::new(0x7f00_1000_0000, size), Duration::from_secs(5))
        .unwrap();
    assert_eq!(read, size);

    // Host pages were unpinned and unmapped after each operation
    assert_eq!(sim.pinned_pages(), 0);
    assert_eq!(sim.mapped_segments(), 0);
    assert_eq!(dev.stats().bytes_transferred, 2 * size);
}

#[test]
fn test_host_io_larger_than_buffer_rejected() {
    let dev = device();
    let (handle, _) = dev.alloc(4096, 0).unwrap();

    let err = dev
        .write_buffer(
            handle,
            HostRegion::new(0x7f00_0000_0000, 8192),
            Duration::from_secs(1),
        )
        .unwrap_err();
    assert!(matches!(err, AccelError::InvalidSize { .. }));
    assert_eq!(dev.stats().free_channels, 4);
}

#[test]
fn test_unload_model_twice_reports_not_found() {
    let dev = device();
    let model = dev.load_model(&[1u8; 64], 0).unwrap();

    assert!(dev.unload_model(model).is_ok());
    let err = dev.unload_model(model).unwrap_err();
    assert!(matches!(err, AccelError::HandleNotFound(_)));
}

#[test]
fn test_model_size_validation() {
    let dev = device();

    let err = dev.load_model(&[], 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let oversized = vec![0u8; 64 * 4096 + 1];
    let err = dev.load_model(&oversized, 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    assert_eq!(dev.stats().live_models, 0);
}

#[test]
fn test_channel_exhaustion_at_submit() {
    let dev = DeviceManager::new(
        config()
            .with_num_channels(1)
            .with_sim_latency(Duration::from_millis(100)),
    )
    .unwrap();

    let (fence, model, input, output) = submit_one(&dev, 4096);

    // The single channel is held by the running job
    let err = dev
        .submit_inference(&InferenceRequest {
            model,
            input,
            output,
            input_size: 4096,
            output_size: 4096,
            priority: 0,
        })
        .unwrap_err();
    assert!(matches!(err, AccelError::NoChannelsFree));
    // The rejected submit issued no fence
    assert_eq!(dev.last_fence(), fence);

    dev.wait(fence, Duration::from_secs(5)).unwrap();

    // With the channel back, submission succeeds
    let fence2 = dev
        .submit_inference(&InferenceRequest {
            model,
            input,
            output,
            input_size: 4096,
            output_size: 4096,
            priority: 0,
        })
        .unwrap();
    assert_eq!(dev.wait(fence2, Duration::from_secs(5)).unwrap(), JobStatus::Complete);
}

#[test]
fn test_free_during_job_defers_reclamation() {
    let dev = DeviceManager::new(config().with_sim_latency(Duration::from_millis(50))).unwrap();
    let (fence, model, input, output) = submit_one(&dev, 4096);

    // Free everything while the job is still running; the handles die
    // now, the storage lives until the job drops its borrows
    dev.free(input).unwrap();
    dev.free(output).unwrap();
    dev.unload_model(model).unwrap();
    assert_eq!(dev.stats().live_buffers, 0);

    let status = dev.wait(fence, Duration::from_secs(5)).unwrap();
    assert_eq!(status, JobStatus::Complete);

    // Give the completion handler a moment to drop its borrows
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(dev.stats().memory_used, 0);
}

#[test]
fn test_shutdown_wakes_waiters_and_drains_tables() {
    let dev = Arc::new(
        DeviceManager::new(config().with_sim_latency(Duration::from_millis(500))).unwrap(),
    );
    let (fence, _, _, _) = submit_one(&dev, 4096);

    let waiter = {
        let dev = Arc::clone(&dev);
        std::thread::spawn(move || dev.wait(fence, Duration::from_secs(10)))
    };

    std::thread::sleep(Duration::from_millis(20));
    dev.shutdown();

    let status = waiter.join().unwrap().unwrap();
    assert_eq!(status, JobStatus::Error(ErrorCode::DeviceError));

    let stats = dev.stats();
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(stats.live_models, 0);
    assert_eq!(stats.active_jobs, 0);

    // The session rejects new work after teardown
    assert!(dev.alloc(4096, 0).is_err());
}

#[test]
fn test_stats_counters_accumulate_monotonically() {
    let dev = device();
    let mut last_submitted = 0;

    for round in 1..=3u64 {
        let (fence, model, input, output) = submit_one(&dev, 4096);
        dev.wait(fence, Duration::from_secs(5)).unwrap();
        dev.free(input).unwrap();
        dev.free(output).unwrap();
        dev.unload_model(model).unwrap();

        // The completion context updates counters after waking waiters
        std::thread::sleep(Duration::from_millis(20));
        let stats = dev.stats();
        assert!(stats.jobs_submitted > last_submitted);
        assert_eq!(stats.jobs_submitted, round);
        assert_eq!(stats.jobs_completed, round);
        last_submitted = stats.jobs_submitted;
    }

    let text = dev.metrics_text().unwrap();
    assert!(text.contains("accelforge_jobs_submitted"));
}
