//! Aggregation stage: concatenates a same-type run into one unit.

use assetmill_core::Result;
use assetmill_core::nut::{Nut, NutType, composite};
use assetmill_core::util::merge_path;

use crate::chain::Stage;
use crate::request::{PipelineRequest, StageType};

pub struct TextAggregatorStage {
    works: bool,
}

impl TextAggregatorStage {
    pub fn new(works: bool) -> TextAggregatorStage {
        TextAggregatorStage { works }
    }
}

impl Stage for TextAggregatorStage {
    fn stage_type(&self) -> StageType {
        StageType::Aggregator
    }

    fn kind(&self) -> &'static str {
        "text-aggregator"
    }

    fn works(&self) -> bool {
        self.works
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        let nuts = request.nuts();

        let aggregatable = !nuts.is_empty()
            && nuts.iter().all(|nut| {
                matches!(nut.nut_type(), NutType::Script | NutType::Stylesheet)
                    && nut.is_reachable()
            });
        if !aggregatable {
            return Ok(nuts.to_vec());
        }

        let name = format!("aggregate{}", nuts[0].nut_type().extension());
        let prefix = request.created_nut_prefix();
        let name = if prefix.is_empty() {
            name
        } else {
            merge_path(&[prefix, &name])
        };

        Ok(vec![composite(name, Some(b"\r\n"), nuts.to_vec())?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use assetmill_core::heap::MemoryHeap;
    use std::sync::Arc;

    fn request(nuts: Vec<Nut>, prefix: &str) -> PipelineRequest {
        RequestBuilder::new("wf", Arc::new(MemoryHeap::new("wf")))
            .nuts(nuts)
            .prefix_created_nut(prefix)
            .build()
    }

    #[test]
    fn aggregates_into_single_named_unit() {
        let nuts = vec![
            Nut::from_bytes("a.js", b"a();".to_vec()).unwrap(),
            Nut::from_bytes("b.js", b"b();".to_vec()).unwrap(),
        ];

        let out = TextAggregatorStage::new(true).parse(&request(nuts, "")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "aggregate.js");
        assert_eq!(out[0].bytes().unwrap(), b"a();\r\nb();");
        assert_eq!(out[0].sources().len(), 2);
    }

    #[test]
    fn created_nut_prefix_applies() {
        let nuts = vec![Nut::from_bytes("a.css", b"a{}".to_vec()).unwrap()];
        let out = TextAggregatorStage::new(true)
            .parse(&request(nuts, "best-effort"))
            .unwrap();
        assert_eq!(out[0].name(), "best-effort/aggregate.css");
    }

    #[test]
    fn image_runs_pass_through() {
        let nuts = vec![Nut::from_bytes("a.png", vec![1u8]).unwrap()];
        let out = TextAggregatorStage::new(true).parse(&request(nuts, "")).unwrap();
        assert_eq!(out[0].name(), "a.png");
    }
}
