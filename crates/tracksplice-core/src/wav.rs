use std::{fs, io::BufWriter, path::Path};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

pub const DEFAULT_SAMPLE_RATE: u32 = 8_000;

#[must_use]
pub fn mono_pcm16_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

#[instrument(fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<Vec<i16>> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open wav file: {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        bail!(
            "{} is not mono 16-bit PCM (channels={}, bits={}, format={:?})",
            path.display(),
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to decode samples from {}", path.display()))?;
    debug!(
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        "wav loaded"
    );
    Ok(samples)
}

pub fn save(path: &Path, samples: &[i16]) -> Result<()> {
    save_with_sample_rate(path, samples, DEFAULT_SAMPLE_RATE)
}

/// Writes a mono 16-bit PCM file. The data goes to a temp file next to
/// `path` first, so a failed write never leaves a truncated file behind.
#[instrument(skip(samples), fields(path = %path.display(), samples = samples.len(), sample_rate))]
pub fn save_with_sample_rate(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create wav output directory: {}", parent.display()))?;

    let mut temp_file =
        tempfile::NamedTempFile::new_in(parent).context("failed to create temp wav file")?;
    {
        let mut writer = hound::WavWriter::new(
            BufWriter::new(temp_file.as_file_mut()),
            mono_pcm16_spec(sample_rate),
        )
        .context("failed to start wav stream")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("failed to write wav sample")?;
        }
        writer.finalize().context("failed to finalize wav file")?;
    }

    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist wav file: {}", path.display()))?;
    info!("wav saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_preserves_samples() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("nested").join("clip.wav");
        let samples = [0, 1, -1, i16::MAX, i16::MIN, 1234];

        save(&path, &samples).expect("save should succeed");
        let reader = hound::WavReader::open(&path).expect("saved file should parse");
        assert_eq!(reader.spec(), mono_pcm16_spec(DEFAULT_SAMPLE_RATE));
        assert_eq!(load(&path).expect("load should succeed"), samples);
    }

    #[test]
    fn stereo_files_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            ..mono_pcm16_spec(DEFAULT_SAMPLE_RATE)
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("stereo wav should be creatable");
        writer.write_sample(1_i16).expect("left sample");
        writer.write_sample(2_i16).expect("right sample");
        writer.finalize().expect("finalize should succeed");

        let error = load(&path).expect_err("stereo input must be rejected");
        assert!(error.to_string().contains("not mono 16-bit PCM"));
    }
}
