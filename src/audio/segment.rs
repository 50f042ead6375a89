use std::sync::Arc;

/// Buffers below this size are probably empty or corrupt
pub const MIN_EXPECTED_BYTES: usize = 100;

/// Fallback container when neither the recorder nor the chunks name one
pub const DEFAULT_MIME_TYPE: &str = "audio/webm";

/// One immutable captured utterance plus its container type.
///
/// The bytes are shared, so cloning a segment is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    data: Arc<[u8]>,
    mime_type: String,
}

impl AudioSegment {
    pub fn new(data: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn empty(mime_type: impl Into<String>) -> Self {
        Self::new(Vec::new(), mime_type)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_probably_empty(&self) -> bool {
        self.data.len() < MIN_EXPECTED_BYTES
    }

    /// Container without codec parameters, e.g. `audio/webm` for `audio/webm;codecs=opus`
    pub fn container(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or_default()
    }

    pub fn is_wav(&self) -> bool {
        matches!(self.container(), "audio/wav" | "audio/wave" | "audio/x-wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_strips_codec_parameters() {
        let seg = AudioSegment::new(vec![0u8; 4], "audio/webm;codecs=opus");
        assert_eq!(seg.container(), "audio/webm");
        assert!(!seg.is_wav());

        let seg = AudioSegment::new(vec![0u8; 4], "audio/x-wav");
        assert!(seg.is_wav());
    }

    #[test]
    fn test_small_buffers_are_flagged() {
        assert!(AudioSegment::empty("audio/wav").is_probably_empty());
        assert!(AudioSegment::new(vec![1u8; 99], "audio/wav").is_probably_empty());
        assert!(!AudioSegment::new(vec![1u8; 100], "audio/wav").is_probably_empty());
    }
}
