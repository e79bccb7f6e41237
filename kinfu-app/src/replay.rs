//! `kinfu replay`

use crate::ReplayArgs;
use kinfu_capture::{
    CaptureConfig, CaptureSession, CaptureUpdate, LogReceiver, LoopAction, NativeCapture,
    ReplaySource, TickCapture, log_channel,
};
use kinfu_data::{ReaderOptions, read_point_cloud_file};
use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub fn run(args: &ReplayArgs) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::default(),
    };
    let options = if args.lenient {
        ReaderOptions::lenient()
    } else {
        ReaderOptions::default()
    };
    let cloud = read_point_cloud_file(&args.file, options)?;
    info!(points = cloud.len(), ticks = args.ticks, "Replaying point cloud");

    let mut source = ReplaySource::new(cloud);
    let (sink, logs) = log_channel();
    source.register_log_sink(sink, config.log_level);

    if args.cooperative {
        run_cooperative(source, &config, &logs, args.ticks)
    } else {
        run_threaded(source, config, &logs, args.ticks)
    }
}

fn report(frame: usize, update: &CaptureUpdate) {
    let points = update.cloud.as_ref().map_or(0, |cloud| cloud.len());
    let translation = update
        .corrected_pose
        .as_ref()
        .and_then(|pose| pose.translation);
    match &update.grid {
        Some(grid) => info!(
            frame,
            points,
            width = grid.width,
            height = grid.height,
            far = grid.far,
            translation = ?translation,
            "Frame"
        ),
        None => info!(frame, translation = ?translation, "Frame without points"),
    }
}

/// Latest time to wait for `ticks` frames at `interval`, or `None` when that
/// lies beyond what `Instant` can represent.
fn frame_deadline(interval: Duration, ticks: usize) -> Option<Instant> {
    let frames = u32::try_from(ticks).unwrap_or(u32::MAX).saturating_add(1);
    Instant::now().checked_add(interval.saturating_mul(frames).saturating_mul(4))
}

fn run_threaded(
    source: ReplaySource,
    config: CaptureConfig,
    logs: &LogReceiver,
    ticks: usize,
) -> Result<(), Box<dyn Error>> {
    let interval = config.sleep_interval();
    // Give up if the device stops producing frames.
    let deadline = frame_deadline(interval, ticks);
    let mut session = CaptureSession::new(source, config);
    session.start()?;

    let mut frames = 0;
    while frames < ticks {
        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            warn!(frames, "Timed out waiting for frames");
            break;
        }
        thread::sleep(interval / 2);
        logs.drain();
        match session.poll() {
            Ok(Some(update)) => {
                frames += 1;
                report(frames, &update);
            }
            Ok(None) => {}
            Err(e) => {
                logs.drain();
                return Err(e.into());
            }
        }
    }

    session.stop()?;
    logs.drain();
    Ok(())
}

fn run_cooperative(
    source: ReplaySource,
    config: &CaptureConfig,
    logs: &LogReceiver,
    ticks: usize,
) -> Result<(), Box<dyn Error>> {
    if ticks == 0 {
        return Ok(());
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let mut capture = TickCapture::new(source, config);
    capture.start()?;

    let mut frames = 0;
    let result = runtime.block_on(capture.run(|update| {
        frames += 1;
        logs.drain();
        report(frames, &update);
        if frames >= ticks {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    }));
    logs.drain();
    result?;
    info!(frames = capture.source().frames_captured(), "Replay finished");
    Ok(())
}
