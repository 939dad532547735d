use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use ed25519_dalek::SigningKey;
use oulipo_core::{Identifier, Machine, MemoryDocumentStore, MemoryInvariantStore, VariantSpan};
use tracing_subscriber::EnvFilter;

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    storage: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    replay_ms: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut count: u64 = 200;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        }
    }

    let home = Identifier::new("ted://1.999.0.1.0.1.1.1");
    let key = SigningKey::from_bytes(&[42; 32]);
    let mut documents = MemoryDocumentStore::new();
    let mut machine = Machine::writable(MemoryInvariantStore::new(home.clone()));

    let start = Instant::now();
    for i in 0..count {
        machine.insert(i * 4 + 1, "word").expect("insert");
    }
    for i in 0..count / 2 {
        let span = VariantSpan::new(i * 4 + 1, 2).expect("span");
        machine.move_variant(1, span).expect("move");
    }
    let head = machine
        .flush(&key, &mut documents)
        .expect("flush")
        .expect("edits were logged");
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let replay = Instant::now();
    let loaded = Machine::load_document(&head, &documents, MemoryInvariantStore::new(home))
        .expect("replay");
    let replay_ms = replay.elapsed().as_secs_f64() * 1000.0;
    assert_eq!(loaded.text().expect("text"), machine.text().expect("text"));

    let total_ops = count + count / 2;
    let output = Output {
        implementation: "core-memory",
        storage: "memory",
        workload: format!("insert-move-{}", count),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name: format!("insert-move-{}", count),
        total_ops,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            total_ops as f64 / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra { count, replay_ms },
        source_file: out_file.as_ref().map(|p| p.display().to_string()),
    };

    let json = serde_json::to_string_pretty(&output).expect("serialize");
    if let Some(path) = out_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdirs");
        }
        fs::write(&path, &json).expect("write output");
    }
    println!("{}", json);
}
