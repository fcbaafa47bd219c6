use crate::core::{AudioBuffer, PlayerError, Result, SampleFormat};

/// 音频参数（源或目标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub format: SampleFormat,
    /// 一个采样帧（全部声道）的字节数
    pub frame_size: usize,
    pub bytes_per_sec: usize,
}

impl AudioParams {
    pub fn new(sample_rate: u32, channels: u16, channel_layout: u64, format: SampleFormat) -> Self {
        let frame_size = channels as usize * format.bytes_per_sample();
        Self {
            sample_rate,
            channels,
            channel_layout,
            format,
            frame_size,
            bytes_per_sec: frame_size * sample_rate as usize,
        }
    }

    pub fn of_buffer(buffer: &AudioBuffer) -> Self {
        Self::new(buffer.sample_rate, buffer.channels, buffer.channel_layout, buffer.format)
    }

    /// 格式、声道布局和采样率是否与解码帧一致
    pub fn matches(&self, buffer: &AudioBuffer) -> bool {
        self.format == buffer.format
            && self.channels == buffer.channels
            && self.channel_layout == buffer.channel_layout
            && self.sample_rate == buffer.sample_rate
    }
}

/// 音频格式转换器
pub trait AudioResampler: Send {
    /// 在接下来 distance 个输出采样内额外增加（或减少）sample_delta 个采样
    fn set_compensation(&mut self, sample_delta: i32, distance: i32) -> Result<()>;

    /// 转换一帧，返回目标格式的交错数据，最多 max_out_samples 个采样
    fn convert(&mut self, input: &AudioBuffer, max_out_samples: usize) -> Result<Vec<u8>>;
}

/// 内置的线性插值重采样器：格式转换、声道映射、采样率转换和采样数补偿
pub struct LinearResampler {
    dst: AudioParams,
    /// 尚未分摊的补偿采样数，以及剩余的分摊距离（输出采样）
    compensation: i64,
    compensation_distance: i64,
}

impl LinearResampler {
    pub fn new(src: AudioParams, dst: AudioParams) -> Result<Self> {
        if dst.format.is_planar() {
            return Err(PlayerError::ResampleError(format!(
                "不支持平面输出格式: {:?}",
                dst.format
            )));
        }
        if src.channels == 0 || dst.channels == 0 || src.sample_rate == 0 || dst.sample_rate == 0 {
            return Err(PlayerError::ResampleError(format!(
                "无效的音频参数: {}Hz/{}ch → {}Hz/{}ch",
                src.sample_rate, src.channels, dst.sample_rate, dst.channels
            )));
        }
        Ok(Self {
            dst,
            compensation: 0,
            compensation_distance: 0,
        })
    }

    /// 按本帧占剩余距离的比例取出一部分补偿
    fn take_compensation(&mut self, out_samples: i64) -> i64 {
        if self.compensation_distance <= 0 {
            return 0;
        }
        let span = out_samples.min(self.compensation_distance);
        let delta = (self.compensation as f64 * span as f64 / self.compensation_distance as f64).round()
            as i64;
        self.compensation -= delta;
        self.compensation_distance -= span;
        delta
    }

    /// 把目标声道映射为源声道上的取值
    fn mapped_sample(input: &AudioBuffer, dst_channels: u16, channel: usize, index: usize) -> f32 {
        let src_channels = input.channels as usize;
        if dst_channels == 1 && src_channels > 1 {
            let sum: f32 = (0..src_channels).map(|c| read_sample(input, c, index)).sum();
            sum / src_channels as f32
        } else if src_channels == 1 {
            read_sample(input, 0, index)
        } else if channel < src_channels {
            read_sample(input, channel, index)
        } else {
            0.0
        }
    }
}

impl AudioResampler for LinearResampler {
    fn set_compensation(&mut self, sample_delta: i32, distance: i32) -> Result<()> {
        self.compensation = sample_delta as i64;
        self.compensation_distance = if sample_delta == 0 { 0 } else { (distance as i64).max(1) };
        Ok(())
    }

    fn convert(&mut self, input: &AudioBuffer, max_out_samples: usize) -> Result<Vec<u8>> {
        let in_samples = input.nb_samples;
        if in_samples == 0 || input.sample_rate == 0 {
            return Ok(Vec::new());
        }

        let scaled = in_samples as f64 * self.dst.sample_rate as f64 / input.sample_rate as f64;
        let base = scaled.round() as i64;
        let compensated = base + self.take_compensation(base);
        let out_samples = (compensated.max(0) as usize).min(max_out_samples);

        let dst_channels = self.dst.channels;
        let mut out = Vec::with_capacity(out_samples * self.dst.frame_size);
        for i in 0..out_samples {
            let position = i as f64 * in_samples as f64 / out_samples as f64;
            let i0 = (position.floor() as usize).min(in_samples - 1);
            let i1 = (i0 + 1).min(in_samples - 1);
            let frac = (position - i0 as f64) as f32;
            for channel in 0..dst_channels as usize {
                let a = Self::mapped_sample(input, dst_channels, channel, i0);
                let b = Self::mapped_sample(input, dst_channels, channel, i1);
                write_sample(&mut out, self.dst.format, a + (b - a) * frac);
            }
        }
        Ok(out)
    }
}

fn read_sample(buffer: &AudioBuffer, channel: usize, index: usize) -> f32 {
    let bps = buffer.format.bytes_per_sample();
    let (plane, offset) = if buffer.format.is_planar() {
        (buffer.planes.get(channel), index * bps)
    } else {
        (buffer.planes.first(), (index * buffer.channels as usize + channel) * bps)
    };
    let Some(bytes) = plane.and_then(|p| p.get(offset..offset + bps)) else {
        return 0.0;
    };
    match buffer.format {
        SampleFormat::U8 | SampleFormat::U8P => (bytes[0] as f32 - 128.0) / 128.0,
        SampleFormat::S16 | SampleFormat::S16P => {
            i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
        }
        SampleFormat::S32 | SampleFormat::S32P => {
            (i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 2147483648.0) as f32
        }
        SampleFormat::F32 | SampleFormat::F32P => {
            f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
        SampleFormat::F64 | SampleFormat::F64P => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            f64::from_ne_bytes(raw) as f32
        }
    }
}

fn write_sample(out: &mut Vec<u8>, format: SampleFormat, value: f32) {
    let value = value.clamp(-1.0, 1.0);
    match format {
        SampleFormat::U8 | SampleFormat::U8P => {
            out.push((value * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8)
        }
        SampleFormat::S16 | SampleFormat::S16P => {
            let sample = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            out.extend_from_slice(&sample.to_ne_bytes());
        }
        SampleFormat::S32 | SampleFormat::S32P => {
            let sample = (value as f64 * 2147483648.0).round().clamp(-2147483648.0, 2147483647.0) as i32;
            out.extend_from_slice(&sample.to_ne_bytes());
        }
        SampleFormat::F32 | SampleFormat::F32P => out.extend_from_slice(&value.to_ne_bytes()),
        SampleFormat::F64 | SampleFormat::F64P => {
            out.extend_from_slice(&(value as f64).to_ne_bytes())
        }
    }
}
