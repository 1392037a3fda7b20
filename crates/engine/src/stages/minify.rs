//! Minification stage: strips comments and collapses blank lines,
//! reusing the scanning engine's lexical state machine.

use assetmill_core::Result;
use assetmill_core::nut::{Nut, NutType, TransformerSpec};

use crate::chain::Stage;
use crate::request::{PipelineRequest, StageType};
use crate::scan::{collapse_blank_lines, strip_comments};

pub struct MinifyStage {
    works: bool,
}

impl MinifyStage {
    pub fn new(works: bool) -> MinifyStage {
        MinifyStage { works }
    }
}

impl Stage for MinifyStage {
    fn stage_type(&self) -> StageType {
        StageType::Minification
    }

    fn kind(&self) -> &'static str {
        "text-minifier"
    }

    fn works(&self) -> bool {
        self.works
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        let mut out = Vec::with_capacity(request.nuts().len());

        for nut in request.nuts() {
            if !matches!(nut.nut_type(), NutType::Script | NutType::Stylesheet)
                || !nut.is_reachable()
            {
                out.push(nut.clone());
                continue;
            }

            let mut nut = nut.clone();
            let minified = collapse_blank_lines(&strip_comments(&nut.text()?));
            nut.set_bytes(minified.into_bytes());
            // Record the transforms so dynamic entries can re-apply
            // them against live content.
            nut.add_transformer(TransformerSpec::StripComments);
            nut.add_transformer(TransformerSpec::CollapseBlankLines);
            out.push(nut);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use assetmill_core::heap::MemoryHeap;
    use std::sync::Arc;

    #[test]
    fn strips_comments_and_blank_lines() {
        let nut = Nut::from_bytes("a.js", b"var a = 1; // c\n\n\n/* b */var b;\n".to_vec()).unwrap();
        let request = RequestBuilder::new("wf", Arc::new(MemoryHeap::new("wf")))
            .nuts(vec![nut])
            .build();

        let out = MinifyStage::new(true).parse(&request).unwrap();
        assert_eq!(out[0].text().unwrap(), "var a = 1; \n\nvar b;\n");
        assert_eq!(
            out[0].transformers(),
            &[
                TransformerSpec::StripComments,
                TransformerSpec::CollapseBlankLines
            ]
        );
    }

    #[test]
    fn images_pass_through() {
        let nut = Nut::from_bytes("a.png", vec![1u8, 2, 3]).unwrap();
        let request = RequestBuilder::new("wf", Arc::new(MemoryHeap::new("wf")))
            .nuts(vec![nut])
            .build();

        let out = MinifyStage::new(true).parse(&request).unwrap();
        assert_eq!(out[0].bytes().unwrap(), vec![1u8, 2, 3]);
        assert!(out[0].transformers().is_empty());
    }
}
