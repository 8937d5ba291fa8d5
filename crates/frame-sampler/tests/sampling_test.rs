/// End-to-end sampling over synthetic frame sources
use image::{Rgb, RgbImage};
use video_digest_common::{FrameBatch, ProcessingError, Result};
use video_digest_decoder::{DecodedFrame, FrameSource, GeneratedFrameSource};
use video_digest_sampler::{sample_frames, SamplerConfig};

const FPS: f64 = 10.0;

fn solid(value: u8) -> RgbImage {
    RgbImage::from_pixel(48, 32, Rgb([value, value, value]))
}

/// Deterministic noisy frame: LCG seeded by frame index
fn noise(seed: u64) -> RgbImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    RgbImage::from_fn(16, 16, |_, _| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let v = (state >> 56) as u8;
        Rgb([v, v, v])
    })
}

fn collect_times<F>(seconds: u64, config: &SamplerConfig, generate: F) -> (Vec<f64>, Vec<FrameBatch>)
where
    F: FnMut(u64) -> RgbImage,
{
    let mut source = GeneratedFrameSource::new(FPS, seconds * FPS as u64, generate);
    let mut batches = Vec::new();
    sample_frames(&mut source, config, |batch| {
        batches.push(batch);
        Ok(())
    })
    .unwrap();
    let times = batches
        .iter()
        .flat_map(|b| b.frames.iter().map(|f| f.time_seconds))
        .collect();
    (times, batches)
}

fn scenario_config() -> SamplerConfig {
    SamplerConfig {
        min_interval: 2.0,
        max_interval: 8.0,
        ..SamplerConfig::default()
    }
}

#[test]
fn test_static_video_selects_first_frame_and_interval() {
    let (times, _) = collect_times(10, &scenario_config(), |_| solid(90));
    assert_eq!(times, vec![0.0, 8.0]);
}

#[test]
fn test_hard_cut_selects_cut_then_interval_after_cut() {
    let config = scenario_config();
    let cut = |i: u64| if (i as f64) / FPS < 3.0 { solid(0) } else { solid(255) };

    let (times, batches) = collect_times(12, &config, cut);
    assert_eq!(times, vec![0.0, 3.0, 11.0]);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].timestamps(), vec![0, 3, 11]);

    // Within 10 seconds the interval after the cut has not elapsed yet
    let (times, _) = collect_times(10, &config, cut);
    assert_eq!(times, vec![0.0, 3.0]);
}

#[test]
fn test_selected_frames_respect_interval_bounds() {
    let config = SamplerConfig {
        min_interval: 1.5,
        max_interval: 4.0,
        scene_change_threshold: 60.0,
        ..SamplerConfig::default()
    };
    // Alternate long static stretches with noisy ones
    let (times, _) = collect_times(60, &config, |i| {
        if (i / 70) % 2 == 0 {
            solid(120)
        } else {
            noise(i)
        }
    });

    assert!(times.len() > 2);
    assert_eq!(times[0], 0.0);
    let frame_step = 1.0 / FPS;
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= config.min_interval - 1e-9, "gap {gap} below min");
        assert!(gap <= config.max_interval + frame_step + 1e-9, "gap {gap} above max");
    }
    let last = *times.last().unwrap();
    assert!(60.0 - frame_step - last < config.max_interval + frame_step);
}

#[test]
fn test_selection_is_deterministic() {
    let config = SamplerConfig {
        min_interval: 0.5,
        max_interval: 3.0,
        ..SamplerConfig::default()
    };
    let (first, _) = collect_times(20, &config, noise);
    let (second, _) = collect_times(20, &config, noise);
    assert_eq!(first, second);
}

#[test]
fn test_partial_batch_is_flushed() {
    let config = SamplerConfig {
        min_interval: 0.0,
        max_interval: 0.05,
        batch_size: 4,
        ..SamplerConfig::default()
    };
    let mut source = GeneratedFrameSource::new(FPS, 10, |_| solid(0));
    let mut sizes = Vec::new();
    let stats = sample_frames(&mut source, &config, |batch| {
        sizes.push(batch.len());
        Ok(())
    })
    .unwrap();

    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(stats.frames_decoded, 10);
    assert_eq!(stats.frames_sampled, 10);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.interval_selections, 9);
}

#[test]
fn test_zero_frames_yields_no_batches() {
    let mut source = GeneratedFrameSource::new(FPS, 0, |_| solid(0));
    let mut called = false;
    let stats = sample_frames(&mut source, &SamplerConfig::default(), |_| {
        called = true;
        Ok(())
    })
    .unwrap();

    assert!(!called);
    assert_eq!(stats.frames_decoded, 0);
    assert_eq!(stats.batches, 0);
}

#[test]
fn test_batch_handler_error_aborts() {
    let config = SamplerConfig {
        min_interval: 0.0,
        max_interval: 0.05,
        batch_size: 1,
        ..SamplerConfig::default()
    };
    let mut source = GeneratedFrameSource::new(FPS, 50, |_| solid(0));
    let mut calls = 0;
    let result = sample_frames(&mut source, &config, |_| {
        calls += 1;
        Err(ProcessingError::Other("handler failed".to_string()))
    });

    assert!(result.is_err());
    assert_eq!(calls, 1);
}

/// Three distinct scenes three seconds apart, then a corrupt packet
struct CorruptAfterThreeScenes;

impl FrameSource for CorruptAfterThreeScenes {
    fn frame_rate(&self) -> f64 {
        1.0
    }

    fn for_each_frame(&mut self, visit: &mut dyn FnMut(DecodedFrame) -> Result<()>) -> Result<u64> {
        for (index, value) in [0u8, 255, 0].into_iter().enumerate() {
            visit(DecodedFrame {
                index: index as u64,
                time_seconds: index as f64 * 3.0,
                image: solid(value),
            })?;
        }
        Err(ProcessingError::CorruptedFile("truncated packet".to_string()))
    }
}

#[test]
fn test_decode_error_still_delivers_pending_frames() {
    let mut batches = Vec::new();
    let result = sample_frames(&mut CorruptAfterThreeScenes, &SamplerConfig::default(), |batch| {
        batches.push(batch.timestamps());
        Ok(())
    });

    assert!(matches!(result, Err(ProcessingError::CorruptedFile(_))));
    assert_eq!(batches, vec![vec![0, 3, 6]]);
}

#[test]
fn test_invalid_config_rejected_before_decoding() {
    let config = SamplerConfig {
        batch_size: 0,
        ..SamplerConfig::default()
    };
    let mut source = GeneratedFrameSource::new(FPS, 5, |_| -> RgbImage { panic!("must not decode") });
    let result = sample_frames(&mut source, &config, |_| Ok(()));
    assert!(matches!(result, Err(ProcessingError::InvalidConfig(_))));
}

#[test]
fn test_config_from_partial_yaml() {
    let config: SamplerConfig = serde_yaml::from_str("max_interval: 5.0\nbatch_size: 2\n").unwrap();
    assert_eq!(config.max_interval, 5.0);
    assert_eq!(config.batch_size, 2);
    assert_eq!(config.min_interval, 2.0);
    assert_eq!(config.scene_change_threshold, 30.0);
}
