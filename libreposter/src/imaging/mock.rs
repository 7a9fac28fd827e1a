//! Mock image transform for testing

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{ImageError, Result};
use crate::imaging::ImageTransform;

/// Returns fixed bytes for every URL except the ones marked as failing.
#[derive(Debug, Clone)]
pub struct MockTransform {
    output: Vec<u8>,
    failing: Arc<Mutex<HashSet<String>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl Default for MockTransform {
    fn default() -> Self {
        Self {
            output: vec![0xFF, 0xD8, 0xFF, 0xD9],
            failing: Arc::default(),
            requested: Arc::default(),
        }
    }
}

impl MockTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail downloads of `url`.
    pub fn fail_url(self, url: &str) -> Self {
        self.failing.lock().unwrap().insert(url.to_string());
        self
    }

    /// Every URL passed to `square_pad`, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageTransform for MockTransform {
    async fn square_pad(&self, source_url: &str) -> Result<Vec<u8>> {
        self.requested.lock().unwrap().push(source_url.to_string());

        if self.failing.lock().unwrap().contains(source_url) {
            return Err(ImageError::Download(format!("{} returned 404 Not Found", source_url)).into());
        }
        Ok(self.output.clone())
    }
}
