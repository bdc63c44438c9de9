//! A [`Captioner`] backed by a remote captioning service.
//!
//! Each batch is sent as one `POST` with a JSON body:
//!
//! ```json
//! { "format": "png", "images": ["<base64>", "..."] }
//! ```
//!
//! and the service answers with one caption per image, in order:
//!
//! ```json
//! { "captions": ["a dog on a beach", "..."] }
//! ```

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::captioner::{Captioner, CaptionerResult};

/// Failures talking to the captioning service.
#[derive(Debug, Error)]
pub enum HttpCaptionerError {
    /// Transport failure, including request timeouts.
    #[error("Captioning request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A frame could not be encoded for upload.
    #[error("Failed to encode frame as PNG: {0}")]
    Encode(#[from] image::ImageError),

    /// The service answered with a non-success status.
    #[error("Captioning service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    format: &'a str,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct CaptionResponse {
    captions: Vec<String>,
}

/// Captions batches by calling a remote service.
///
/// Build it once and share it; the underlying connection pool is reused
/// across batches.
#[derive(Debug, Clone)]
pub struct HttpCaptioner {
    client: Client,
    endpoint: String,
}

impl HttpCaptioner {
    /// Call `endpoint` with no request timeout.
    ///
    /// # Errors
    ///
    /// [`HttpCaptionerError::Http`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, HttpCaptionerError> {
        Self::build(endpoint.into(), None)
    }

    /// Call `endpoint`, failing any request that takes longer than
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// [`HttpCaptionerError::Http`] if the HTTP client cannot be built.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HttpCaptionerError> {
        Self::build(endpoint.into(), Some(timeout))
    }

    fn build(endpoint: String, timeout: Option<Duration>) -> Result<Self, HttpCaptionerError> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint,
        })
    }

    /// The service URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, images: &[RgbImage]) -> Result<Vec<String>, HttpCaptionerError> {
        let encoded = images
            .iter()
            .map(encode_png)
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Posting {} frame(s) to {}",
            encoded.len(),
            self.endpoint
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CaptionRequest {
                format: "png",
                images: encoded,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpCaptionerError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response.json::<CaptionResponse>()?.captions)
    }
}

impl Captioner for HttpCaptioner {
    fn caption_batch(&self, images: &[RgbImage]) -> CaptionerResult {
        Ok(self.request(images)?)
    }
}

fn encode_png(image: &RgbImage) -> Result<String, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}
