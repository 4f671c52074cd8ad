#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use ang::diagnostics::CollectingSink;
use ang::pipeline::PipelineOptions;

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn options(sink: &CollectingSink) -> PipelineOptions {
    PipelineOptions {
        warning_sink: Some(Arc::new(sink.clone())),
        ..Default::default()
    }
}

pub const USER_ENTITY: &str = r#"package domain

#User: {
	id: string
	email: string
}
"#;

pub const USER_API: &str = r#"package api

Op1: {
	service: "svc1"
	input: {id: string}
	output: {id: string, email: string}
}

HTTP: {
	Op1: {method: "GET", path: "/api/svc1/1/{id}"}
}
"#;
