use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Approximate decoded size of a base64 payload of `encoded_len` characters.
pub fn approx_payload_bytes(encoded_len: usize) -> usize {
    encoded_len / 4 * 3 + (encoded_len % 4) * 3 / 4
}

/// An embeddable image: media type plus base64 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Parses `data:<mime>;base64,<body>`.
    pub fn from_data_url(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix("data:") else {
            bail!("image payload is not a data URL");
        };
        let Some((header, body)) = rest.split_once(',') else {
            bail!("image data URL has no payload");
        };
        let Some(media_type) = header.strip_suffix(";base64") else {
            bail!("image data URL must be base64 encoded");
        };
        let media_type = media_type.trim().to_ascii_lowercase();
        if !media_type.starts_with("image/") {
            bail!("data URL media type '{media_type}' is not an image");
        }
        let body = body.trim();
        if body.is_empty() {
            bail!("image data URL has an empty payload");
        }
        Ok(Self::new(media_type, body))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    pub fn data_url_len(&self) -> usize {
        "data:;base64,".len() + self.media_type.len() + self.data.len()
    }

    pub fn approx_bytes(&self) -> usize {
        approx_payload_bytes(self.data_url_len())
    }
}

#[cfg(test)]
mod tests {
    use super::{approx_payload_bytes, ImagePayload};

    #[test]
    fn parses_and_rebuilds_data_url() -> anyhow::Result<()> {
        let payload = ImagePayload::from_data_url(" data:image/PNG;base64,aGVsbG8= ")?;
        assert_eq!(payload.media_type, "image/png");
        assert_eq!(payload.data, "aGVsbG8=");
        assert_eq!(payload.data_url(), "data:image/png;base64,aGVsbG8=");
        assert_eq!(payload.data_url_len(), payload.data_url().len());
        Ok(())
    }

    #[test]
    fn rejects_non_image_and_non_base64_urls() {
        assert!(ImagePayload::from_data_url("data:text/plain;base64,aGk=").is_err());
        assert!(ImagePayload::from_data_url("data:image/png,raw").is_err());
        assert!(ImagePayload::from_data_url("data:image/png;base64,").is_err());
        assert!(ImagePayload::from_data_url("https://example.com/a.png").is_err());
    }

    #[test]
    fn approximate_size_is_three_quarters_of_length() {
        assert_eq!(approx_payload_bytes(400), 300);
        assert_eq!(approx_payload_bytes(0), 0);
        assert_eq!(approx_payload_bytes(7), 5);
    }
}
