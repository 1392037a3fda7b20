//! End-to-end inspection: reference rewriting, transitive extraction
//! and the version-query fallback.

use std::collections::HashMap;
use std::sync::Arc;

use assetmill_core::heap::MemoryHeap;
use assetmill_core::nut::{Nut, NutType};
use assetmill_engine::chain::{Chain, chain, run_chains};
use assetmill_engine::request::{PipelineRequest, RequestBuilder};
use assetmill_engine::stages::{MinifyStage, TextInspectorStage};

fn stylesheet_request(heap: Arc<MemoryHeap>, nuts: Vec<Nut>) -> PipelineRequest {
    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Stylesheet,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::stylesheet(true)) as _,
        ]])),
    );

    RequestBuilder::new("wf", heap)
        .context_path("ctx")
        .nuts(nuts)
        .chains(chains)
        .build()
}

#[test]
fn css_url_rewritten_to_served_path() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert_versioned("css/logo.png", b"png".to_vec(), 9);

    let css = Nut::from_bytes("css/style.css", b"a { background: url(logo.png); }".to_vec())
        .expect("nut");
    let request = stylesheet_request(heap, vec![css]);

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert_eq!(text, "a { background: url(/ctx/wf/9/css/logo.png); }");
    assert!(out[0].find_by_name("css/logo.png").is_some());
}

#[test]
fn unresolvable_reference_falls_back_to_version_query() {
    let heap = Arc::new(MemoryHeap::new("wf"));

    let mut css =
        Nut::from_bytes("style.css", b"a { background: url(foo.png); }".to_vec()).expect("nut");
    css.set_version(42);
    let mut with_query =
        Nut::from_bytes("other.css", b"b { background: url(foo.png?bar); }".to_vec())
            .expect("nut");
    with_query.set_version(42);

    let request = stylesheet_request(heap, vec![css, with_query]);
    let out = run_chains(&request).expect("run");

    assert_eq!(
        out[0].text().expect("text"),
        "a { background: url(foo.png?versionNumber=42); }"
    );
    assert_eq!(
        out[1].text().expect("text"),
        "b { background: url(foo.png?bar&versionNumber=42); }"
    );
}

#[test]
fn imported_stylesheets_are_extracted_transitively() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert("base.css", b"body { background: url(bg.png); }".to_vec());
    heap.insert("bg.png", b"png".to_vec());

    let css = Nut::from_bytes("style.css", b"@import 'base.css';\na {}".to_vec()).expect("nut");
    let request = stylesheet_request(heap, vec![css]);

    let out = run_chains(&request).expect("run");

    // The import is rewritten and both the imported sheet and its own
    // background land in the reference graph.
    assert!(out[0].text().expect("text").contains("/ctx/wf/"));
    assert!(out[0].find_by_name("base.css").is_some());
    assert!(out[0].find_by_name("bg.png").is_some());
}

#[test]
fn references_inside_comments_are_ignored() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert("real.png", b"png".to_vec());

    let css = Nut::from_bytes(
        "style.css",
        b"/* url(fake.png) */ a { background: url(real.png); }".to_vec(),
    )
    .expect("nut");
    let request = stylesheet_request(heap, vec![css]);

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert!(text.contains("url(fake.png)"));
    assert!(text.contains("/ctx/wf/"));
    assert!(out[0].find_by_name("real.png").is_some());
    assert!(out[0].find_by_name("fake.png").is_none());
}

#[test]
fn absolute_and_data_urls_pass_through() {
    let heap = Arc::new(MemoryHeap::new("wf"));

    let content = "a { background: url(/abs.png); }\nb { background: url(data:image/png;base64,AA); }";
    let css = Nut::from_bytes("style.css", content.as_bytes().to_vec()).expect("nut");
    let request = stylesheet_request(heap, vec![css]);

    let out = run_chains(&request).expect("run");
    assert_eq!(out[0].text().expect("text"), content);
}

#[test]
fn template_urls_in_scripts_are_resolved() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert_versioned("my-customer.html", b"<b>hi</b>".to_vec(), 3);

    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Script,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::script(true, None).expect("stage")) as _,
        ]])),
    );

    let js = Nut::from_bytes(
        "app.js",
        b"return { templateUrl  : 'my-customer.html' };".to_vec(),
    )
    .expect("nut");
    let request = RequestBuilder::new("wf", heap)
        .context_path("ctx")
        .nuts(vec![js])
        .chains(chains)
        .build();

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert!(text.contains("/ctx/wf/3/my-customer.html"));
    assert!(out[0].find_by_name("my-customer.html").is_some());
}

#[test]
fn template_url_fallback_keeps_query_intact() {
    let heap = Arc::new(MemoryHeap::new("wf"));

    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Script,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::script(true, None).expect("stage")) as _,
        ]])),
    );

    let mut js = Nut::from_bytes(
        "app.js",
        b"a = { templateUrl : 'template.html' };\nb = { templateUrl : 'template2.html?foo' };"
            .to_vec(),
    )
    .expect("nut");
    js.set_version(1);

    let request = RequestBuilder::new("wf", heap)
        .nuts(vec![js])
        .chains(chains)
        .build();

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert!(text.contains("template.html?versionNumber=1"));
    assert!(text.contains("template2.html?foo&versionNumber=1"));
}

#[test]
fn sourcemap_statement_removed_when_minifier_downstream() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert("app.js.map", b"{}".to_vec());

    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Script,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::script(true, None).expect("stage")) as _,
            Arc::new(MinifyStage::new(true)) as _,
        ]])),
    );

    let js = Nut::from_bytes("app.js", b"f();\n//# sourceMappingURL=app.js.map\n".to_vec())
        .expect("nut");
    let request = RequestBuilder::new("wf", heap)
        .nuts(vec![js])
        .chains(chains)
        .build();

    let out = run_chains(&request).expect("run");
    assert!(!out[0].text().expect("text").contains("sourceMappingURL"));
}

#[test]
fn sourcemap_extracted_when_nothing_breaks_it() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert("app.js.map", b"{}".to_vec());

    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Script,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::script(true, None).expect("stage")) as _,
        ]])),
    );

    let js = Nut::from_bytes("app.js", b"f();\n//# sourceMappingURL=app.js.map\n".to_vec())
        .expect("nut");
    let request = RequestBuilder::new("wf", heap)
        .context_path("ctx")
        .nuts(vec![js])
        .chains(chains)
        .build();

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert!(text.contains("sourceMappingURL=/ctx/wf/"));
    assert!(out[0].find_by_name("app.js.map").is_some());
}

#[test]
fn markup_references_are_rewritten() {
    let heap = Arc::new(MemoryHeap::new("wf"));
    heap.insert_versioned("app.js", b"x();".to_vec(), 5);
    heap.insert_versioned("a.css", b"a{}".to_vec(), 6);

    let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
    chains.insert(
        NutType::Markup,
        Arc::new(chain([vec![
            Arc::new(TextInspectorStage::markup(true)) as _,
        ]])),
    );

    let html = Nut::from_bytes(
        "index.html",
        b"<script src=\"app.js\"></script>\n<link rel=\"stylesheet\" href=\"a.css\">\n".to_vec(),
    )
    .expect("nut");
    let request = RequestBuilder::new("wf", heap)
        .context_path("ctx")
        .nuts(vec![html])
        .chains(chains)
        .build();

    let out = run_chains(&request).expect("run");
    let text = out[0].text().expect("text");

    assert!(text.contains("src=\"/ctx/wf/5/app.js\""));
    assert!(text.contains("href=\"/ctx/wf/6/a.css\""));
    assert!(out[0].find_by_name("app.js").is_some());
    assert!(out[0].find_by_name("a.css").is_some());
}
