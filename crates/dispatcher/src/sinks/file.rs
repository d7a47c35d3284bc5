//! FileSink - writes final JPEGs to disk

use chrono::Utc;
use contracts::{BufferFormat, ContractError, FinalImage, OutputSink};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Base output directory
    pub base_path: PathBuf,
    /// Write a per-run manifest (`manifest.jsonl`) next to the images
    pub manifest: bool,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./captures"));
        let manifest = params
            .get("manifest")
            .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes"));

        Self {
            base_path,
            manifest,
        }
    }
}

/// Sink that writes each final image as `capture_<frame>.jpg`
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    manifest: Option<File>,
    written: u64,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        let manifest = if config.manifest {
            Some(
                File::options()
                    .create(true)
                    .append(true)
                    .open(config.base_path.join("manifest.jsonl"))?,
            )
        } else {
            None
        };

        Ok(Self {
            name: name.into(),
            config,
            manifest,
            written: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    fn image_path(&self, image: &FinalImage) -> PathBuf {
        self.config
            .base_path
            .join(format!("capture_{}.jpg", image.frame_number))
    }

    fn write_image_to_disk(&mut self, image: &FinalImage) -> std::io::Result<PathBuf> {
        if image.format != BufferFormat::Jpeg {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported format {:?}", image.format),
            ));
        }

        let path = self.image_path(image);
        let mut file = File::create(&path)?;
        file.write_all(&image.data)?;

        if let Some(manifest) = self.manifest.as_mut() {
            let entry = serde_json::json!({
                "frame_number": image.frame_number,
                "request_id": image.request_id,
                "timestamp_ns": image.timestamp_ns,
                "bytes": image.data.len(),
                "written_at": Utc::now().to_rfc3339(),
                "file": path.file_name().map(|n| n.to_string_lossy().into_owned()),
            });
            serde_json::to_writer(&mut *manifest, &entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            manifest.write_all(b"\n")?;
        }

        self.written += 1;
        Ok(path)
    }

    fn persist_image(&mut self, image: &FinalImage) -> Result<(), ContractError> {
        match self.write_image_to_disk(image) {
            Ok(path) => {
                debug!(sink = %self.name, path = %path.display(), "final image written");
                Ok(())
            }
            Err(e) => {
                error!(sink = %self.name, frame_number = image.frame_number, error = %e, "Write failed");
                Err(ContractError::sink_write(&self.name, e.to_string()))
            }
        }
    }
}

impl OutputSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, image),
        fields(sink = %self.name, frame_number = image.frame_number)
    )]
    async fn write(&mut self, image: &FinalImage) -> Result<(), ContractError> {
        self.persist_image(image)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(manifest) = self.manifest.as_mut() {
            manifest
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, written = self.written, "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::RequestId;
    use tempfile::tempdir;

    fn jpeg(frame_number: u64) -> FinalImage {
        FinalImage {
            frame_number,
            request_id: RequestId(1),
            format: BufferFormat::Jpeg,
            timestamp_ns: 5,
            data: Bytes::from_static(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]),
        }
    }

    #[tokio::test]
    async fn test_file_sink_writes_jpeg_and_manifest() {
        let dir = tempdir().unwrap();
        let config = FileSinkConfig {
            base_path: dir.path().to_path_buf(),
            manifest: true,
        };

        let mut sink = FileSink::new("test_file", config).unwrap();
        sink.write(&jpeg(42)).await.unwrap();
        sink.flush().await.unwrap();

        let bytes = fs::read(dir.path().join("capture_42.jpg")).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);

        let manifest = fs::read_to_string(dir.path().join("manifest.jsonl")).unwrap();
        let entry: serde_json::Value = serde_json::from_str(manifest.lines().next().unwrap()).unwrap();
        assert_eq!(entry["frame_number"], 42);
        assert_eq!(entry["file"], "capture_42.jpg");
    }

    #[tokio::test]
    async fn test_file_sink_rejects_non_jpeg() {
        let dir = tempdir().unwrap();
        let mut params = HashMap::new();
        params.insert("base_path".to_string(), dir.path().display().to_string());
        let mut sink = FileSink::from_params("files", &params).unwrap();

        let mut image = jpeg(1);
        image.format = BufferFormat::Yuv420;
        assert!(sink.write(&image).await.is_err());
        assert!(!dir.path().join("capture_1.jpg").exists());
    }
}
