//! Byte-compression stage. The codec itself is an external collaborator
//! behind the `Codec` trait; the stage only drives it.

use std::sync::Arc;

use assetmill_core::Result;
use assetmill_core::nut::Nut;

use crate::chain::Stage;
use crate::request::{PipelineRequest, StageType};

/// A byte compressor.
pub trait Codec: Send + Sync {
    /// Short codec tag, e.g. for content-encoding metadata.
    fn name(&self) -> &'static str;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

pub struct CompressStage {
    codec: Arc<dyn Codec>,
    works: bool,
}

impl CompressStage {
    pub fn new(codec: Arc<dyn Codec>, works: bool) -> CompressStage {
        CompressStage { codec, works }
    }
}

impl Stage for CompressStage {
    fn stage_type(&self) -> StageType {
        StageType::BinaryCompression
    }

    fn kind(&self) -> &'static str {
        "binary-compressor"
    }

    fn works(&self) -> bool {
        self.works
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        let mut out = Vec::with_capacity(request.nuts().len());

        for nut in request.nuts() {
            // Dynamic content is recomputed at lookup time, compressed
            // bytes would go stale immediately.
            if nut.is_dynamic() || !nut.is_reachable() {
                out.push(nut.clone());
                continue;
            }

            let mut nut = nut.clone();
            let encoded = self.codec.encode(&nut.bytes()?)?;
            nut.set_bytes(encoded);
            out.push(nut);
        }

        Ok(out)
    }
}
