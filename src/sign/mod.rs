//! Signing of distributed images

pub mod cosign;

pub use cosign::CosignSigner;

use crate::error::Result;
use crate::image::Image;
use crate::logging::Logger;
use crate::registry::Registry;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `reference`, which lives in `registry`
    async fn sign(&self, reference: &str, registry: &Registry) -> Result<()>;
}

pub struct SignCoordinator {
    signer: Arc<dyn Signer>,
    output: Logger,
}

impl SignCoordinator {
    pub fn new(signer: Arc<dyn Signer>, output: Logger) -> Self {
        Self { signer, output }
    }

    /// Sign every image in every registry. The first failure stops the rest.
    pub async fn sign(&self, images: &[Image], registries: &[Registry]) -> Result<usize> {
        let mut signed = 0;
        for registry in registries {
            for image in images {
                let reference = image.reference_in(&registry.url);
                if let Err(e) = self.signer.sign(&reference, registry).await {
                    self.output
                        .error(&format!("Error signing {}: {}", reference, e));
                    return Err(e);
                }
                self.output.detail(&format!("Signed {}", reference));
                signed += 1;
            }
        }
        self.output
            .success(&format!("Signed {} image references", signed));
        Ok(signed)
    }
}
