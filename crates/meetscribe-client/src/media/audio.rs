use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use tokio::sync::broadcast;

/// Preferred capture rate, also the Opus clock rate
pub const SAMPLE_RATE: u32 = 48000;

/// Mono 16-bit PCM block as delivered by the capture callback
pub type PcmFrame = Arc<Vec<i16>>;

/// Microphone capture on the default input device.
///
/// `cpal::Stream` cannot leave the thread that built it, so the stream lives
/// on a dedicated thread until this handle is dropped. Captured audio is
/// mixed to mono and fanned out to every subscriber.
pub struct MicrophoneCapture {
    frames: broadcast::Sender<PcmFrame>,
    sample_rate: u32,
    stop: Option<std_mpsc::Sender<()>>,
}

impl MicrophoneCapture {
    pub fn start() -> Result<Self> {
        let (frames, _) = broadcast::channel(256);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<u32>>(1);

        let tx = frames.clone();
        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || match open_input_stream(tx) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Blocks until the handle sends or is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::info!("Microphone capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn microphone thread")?;

        let sample_rate = ready_rx
            .recv()
            .context("Microphone thread exited during startup")??;

        Ok(Self {
            frames,
            sample_rate,
            stop: Some(stop_tx),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> broadcast::Sender<PcmFrame> {
        self.frames.clone()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn open_input_stream(frames: broadcast::Sender<PcmFrame>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No default input device"))?;

    let default_config = device.default_input_config()?;
    let channels = default_config.channels();

    // Prefer 48 kHz float so the Opus encoder needs no resampling
    let config = device
        .supported_input_configs()?
        .find(|range| {
            range.channels() == channels
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= SAMPLE_RATE
                && range.max_sample_rate().0 >= SAMPLE_RATE
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)))
        .unwrap_or(default_config);

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    tracing::info!(
        "Starting microphone capture on {}: {} Hz, {} channels",
        device.name().unwrap_or_else(|_| "unknown device".to_string()),
        sample_rate,
        channels
    );

    let stream = device.build_input_stream(
        &config.into(),
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let pcm = to_pcm16(&downmix(data, channels));
            // No subscribers is fine, capture keeps running
            let _ = frames.send(Arc::new(pcm));
        },
        |err| {
            tracing::error!("Audio capture error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, sample_rate))
}

/// Average interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Convert float samples to signed 16-bit, clamping to [-1, 1].
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Little-endian byte layout of 16-bit PCM.
pub fn pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Regroups arbitrary capture blocks into fixed-size codec frames.
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameChunker {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            out.push(std::mem::replace(&mut self.pending, rest));
        }
        out
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Converts mono capture audio to [`SAMPLE_RATE`] for devices that cannot
/// capture at it natively. Output comes in variable-size blocks.
pub struct RateConverter {
    resampler: FftFixedIn<f32>,
    input: FrameChunker,
}

impl RateConverter {
    pub fn new(from_rate: u32) -> Result<Self> {
        // 20ms input blocks
        let chunk = (from_rate / 50) as usize;
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, SAMPLE_RATE as usize, chunk, 1, 1)
                .with_context(|| format!("Cannot resample {} Hz audio", from_rate))?;

        Ok(Self {
            resampler,
            input: FrameChunker::new(chunk),
        })
    }

    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        let mut out = Vec::new();
        for block in self.input.push(samples) {
            let block: Vec<f32> = block.iter().map(|&s| s as f32 / 32768.0).collect();
            let resampled = self.resampler.process(&[block], None)?;
            out.extend(to_pcm16(&resampled[0]));
        }
        Ok(out)
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.resampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix(&stereo, 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn pcm_conversion_clamps() {
        assert_eq!(to_pcm16(&[0.0, 1.0, -1.0, 2.0, -3.0]), vec![0, 32767, -32768, 32767, -32768]);
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        assert_eq!(pcm16_le_bytes(&[1, -2]), vec![0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn chunker_carries_remainder() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[1, 2, 3]).is_empty());
        assert_eq!(chunker.push(&[4, 5, 6, 7, 8, 9]), vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        chunker.clear();
        assert_eq!(chunker.push(&[10, 11, 12, 13]), vec![vec![10, 11, 12, 13]]);
    }

    #[test]
    fn converter_brings_44k_capture_to_opus_rate() {
        let mut converter = RateConverter::new(44100).unwrap();
        let mut produced = 0;
        // Two seconds in uneven capture blocks
        for _ in 0..200 {
            produced += converter.push(&[1000; 441]).unwrap().len();
        }
        // Allow for the resampler's startup delay
        assert!(produced <= 2 * SAMPLE_RATE as usize);
        assert!(produced >= 2 * SAMPLE_RATE as usize - 4800);
    }
}
